use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::os::unix::io::RawFd;
use std::time::Instant;
use std::{env, process, ptr};

use sliptcp::link::pty::{Pty, READ_CHUNK_SIZE};
use sliptcp::{Application, Config, Error, Node, Result, Stream, errno, error, info, warn};

/// Total number of events returned each tick (event loop cycle).
const EPOLL_MAX_EVENTS: usize = 8;

/// The number of milliseconds that `epoll_wait()` will block for. -1 will
/// block indefinitely until an event occurs.
const EPOLL_TIMEOUT_MS: i32 = -1;

const USAGE: &str = "usage: sliptcp <local-addr> <port> <peer-addr>... [-r <cidr>=<next-hop>]...";

/// Writes back every byte received, and closes once the peer has.
#[derive(Debug, Default)]
struct Echo;

impl Application for Echo {
    fn on_accept(&mut self, stream: &mut Stream<'_>) {
        info!("[{}] accepted connection", stream.id());
    }

    fn on_receive(&mut self, stream: &mut Stream<'_>, payload: &[u8]) {
        let result = if payload.is_empty() {
            info!("[{}] peer closed the stream", stream.id());
            stream.close()
        } else {
            info!("[{}] echoing {} bytes", stream.id(), payload.len());
            stream.send(payload)
        };

        if let Err(err) = result {
            warn!("[{}] {err}", stream.id());
        }
    }
}

#[derive(Debug)]
struct Args {
    local: String,
    port: u16,
    peers: Vec<Ipv4Addr>,
    routes: Vec<(String, String)>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Option<Args> {
    let local = args.next()?;
    let port = args.next()?.parse().ok()?;

    let mut peers: Vec<Ipv4Addr> = Vec::new();
    let mut routes = Vec::new();

    while let Some(arg) = args.next() {
        if arg == "-r" {
            let (cidr, next_hop) = args.next()?.split_once('=').map(|(cidr, next_hop)| {
                (cidr.to_string(), next_hop.to_string())
            })?;
            routes.push((cidr, next_hop));
        } else {
            peers.push(arg.parse().ok()?);
        }
    }

    if peers.is_empty() {
        return None;
    }

    // Neighbours are always reachable over their own line.
    for peer in &peers {
        routes.push((format!("{peer}/32"), peer.to_string()));
    }

    Some(Args {
        local,
        port,
        peers,
        routes,
    })
}

fn main() {
    let Some(args) = parse_args(env::args().skip(1)) else {
        eprintln!("{USAGE}");
        process::exit(2);
    };

    if let Err(err) = run(args) {
        error!("{err}");
        process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let mut lines = Vec::with_capacity(args.peers.len());

    for &peer in &args.peers {
        let pty = Pty::open()?;
        info!("line to {peer}: {}", pty.slave_name());
        lines.push((peer, pty));
    }

    let mut node = Node::new(Config::default(), lines, Echo);

    node.set_local_address(&args.local)?;
    node.set_routing_table(
        args.routes
            .iter()
            .map(|(cidr, next_hop)| (cidr.as_str(), next_hop.as_str())),
    )?;
    node.listen(args.port);

    info!("{} listening on port {}", args.local, args.port);

    let lines: HashMap<RawFd, Ipv4Addr> = node
        .link()
        .peers()
        .filter_map(|peer| node.link().line(peer).map(|pty| (pty.fd(), peer)))
        .collect();

    let timer_fd = init_timer_fd()?;
    let epoll_fd = match init_epoll_fd(lines.keys().copied().chain([timer_fd])) {
        Ok(fd) => fd,
        Err(err) => {
            unsafe {
                let _ = libc::close(timer_fd);
            }
            return Err(err);
        }
    };

    let result = event_loop(&mut node, &lines, epoll_fd, timer_fd);

    unsafe {
        let _ = libc::close(epoll_fd);
        let _ = libc::close(timer_fd);
    }

    result
}

/// Runs the node: reads from every line as bytes arrive, writes queued frames
/// once a full line drains, and fires retransmission timers as they expire.
fn event_loop(
    node: &mut Node<Pty, Echo>,
    lines: &HashMap<RawFd, Ipv4Addr>,
    epoll_fd: RawFd,
    timer_fd: RawFd,
) -> Result<()> {
    // Stores events for ready file descriptors.
    let mut events = [libc::epoll_event { events: 0, u64: 0 }; EPOLL_MAX_EVENTS];
    let mut buf = [0u8; READ_CHUNK_SIZE];
    // Lines currently registered for write readiness.
    let mut watching = HashSet::new();

    loop {
        let rdfs = unsafe {
            libc::epoll_wait(
                epoll_fd,
                events.as_mut_ptr(),
                EPOLL_MAX_EVENTS as i32,
                EPOLL_TIMEOUT_MS,
            )
        };

        if rdfs == -1 {
            return Err(errno!("failed to wait on epoll"));
        }

        for event in events.iter().take(rdfs as usize) {
            let fd = event.u64 as RawFd;
            let flags = event.events;

            if fd == timer_fd {
                // Read from the timer to clear the expiration count.
                let mut count = [0u8; 8];
                let _ = unsafe {
                    libc::read(timer_fd, &raw mut count as *mut libc::c_void, count.len())
                };

                node.on_timer(Instant::now());
                continue;
            }

            let Some(&peer) = lines.get(&fd) else {
                continue;
            };

            if flags & libc::EPOLLOUT as u32 != 0
                && let Some(pty) = node.link_mut().line_mut(peer)
                && let Err(err) = pty.flush()
            {
                warn!("failed to write to line {peer}: {err}");
            }

            if flags & !(libc::EPOLLOUT as u32) == 0 {
                continue;
            }

            // Drain the line; the master is non-blocking.
            loop {
                let nbytes = match node.link().line(peer) {
                    Some(pty) => pty.recv(&mut buf)?,
                    None => 0,
                };

                if nbytes == 0 {
                    break;
                }

                // Failed datagrams are logged where they are dropped.
                if let Err(err @ Error::UnknownLink(_)) =
                    node.on_line_receive(peer, &buf[..nbytes], Instant::now())
                {
                    warn!("dropped input from {peer}: {err}");
                }
            }
        }

        for (&fd, &peer) in lines {
            let pending = node.link().line(peer).is_some_and(Pty::has_pending);

            if pending != watching.contains(&fd) {
                watch_writable(epoll_fd, fd, pending)?;

                if pending {
                    watching.insert(fd);
                } else {
                    watching.remove(&fd);
                }
            }
        }

        rearm_timer(timer_fd, node.next_deadline())?;
    }
}

/// Creates a non-blocking, disarmed `timer_fd`.
fn init_timer_fd() -> Result<RawFd> {
    let timer_fd = unsafe { libc::timerfd_create(libc::CLOCK_MONOTONIC, libc::TFD_NONBLOCK) };
    if timer_fd == -1 {
        return Err(errno!("failed to create timer_fd"));
    }

    Ok(timer_fd)
}

/// Arms `timer_fd` to expire at `deadline`, or disarms it.
fn rearm_timer(timer_fd: RawFd, deadline: Option<Instant>) -> Result<()> {
    let value = match deadline {
        // A zero `it_value` disarms the timer, so an overdue deadline
        // expires after one nanosecond instead.
        Some(deadline) => deadline
            .saturating_duration_since(Instant::now())
            .max(std::time::Duration::from_nanos(1)),
        None => std::time::Duration::ZERO,
    };

    let time_spec = libc::itimerspec {
        // One-shot: no periodic expiration.
        it_interval: libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        },
        it_value: libc::timespec {
            tv_sec: value.as_secs() as libc::time_t,
            tv_nsec: value.subsec_nanos() as libc::c_long,
        },
    };

    if unsafe { libc::timerfd_settime(timer_fd, 0, &raw const time_spec, ptr::null_mut()) } == -1
    {
        return Err(errno!("failed to rearm timer"));
    }

    Ok(())
}

/// Creates an `epoll_fd` and registers the given file descriptors for input.
fn init_epoll_fd(fds: impl IntoIterator<Item = RawFd>) -> Result<RawFd> {
    let epoll_fd = unsafe { libc::epoll_create1(0) };
    if epoll_fd == -1 {
        return Err(errno!("failed to create epoll_fd"));
    }

    for fd in fds {
        let mut ev = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: fd as u64,
        };

        if unsafe { libc::epoll_ctl(epoll_fd, libc::EPOLL_CTL_ADD, fd, &raw mut ev) } == -1 {
            let err = errno!("failed to add to epoll interest list");
            unsafe {
                let _ = libc::close(epoll_fd);
            }
            return Err(err);
        }
    }

    Ok(epoll_fd)
}

/// Adds or removes write readiness from the events `fd` is registered for.
fn watch_writable(epoll_fd: RawFd, fd: RawFd, writable: bool) -> Result<()> {
    let mut events = libc::EPOLLIN as u32;
    if writable {
        events |= libc::EPOLLOUT as u32;
    }

    let mut ev = libc::epoll_event {
        events,
        u64: fd as u64,
    };

    if unsafe { libc::epoll_ctl(epoll_fd, libc::EPOLL_CTL_MOD, fd, &raw mut ev) } == -1 {
        return Err(errno!("failed to modify epoll interest list"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &str) -> Option<Args> {
        parse_args(s.split_whitespace().map(String::from))
    }

    #[test]
    fn parse_peers_and_routes() {
        let args = args("10.0.0.1 7000 10.0.0.2 10.0.1.2 -r 0.0.0.0/0=10.0.0.2").unwrap();

        assert_eq!(args.local, "10.0.0.1");
        assert_eq!(args.port, 7000);
        assert_eq!(
            args.peers,
            vec![Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(10, 0, 1, 2)]
        );
        assert_eq!(
            args.routes,
            vec![
                ("0.0.0.0/0".to_string(), "10.0.0.2".to_string()),
                ("10.0.0.2/32".to_string(), "10.0.0.2".to_string()),
                ("10.0.1.2/32".to_string(), "10.0.1.2".to_string()),
            ]
        );
    }

    #[test]
    fn parse_rejects_incomplete() {
        assert!(args("10.0.0.1 7000").is_none());
        assert!(args("10.0.0.1 port 10.0.0.2").is_none());
        assert!(args("10.0.0.1 7000 10.0.0.2 -r 0.0.0.0/0").is_none());
        assert!(args("10.0.0.1 7000 10.0.0.2 -r").is_none());
    }
}
