//! Duplex relay between one switch connection and the controller.

use crate::config::{FlowFuzzConfig, FuzzDirection};
use crate::fuzzer::{DEFAULT_CHUNK_SIZE, FuzzContext, StreamFuzzer};
use log::{debug, error, info, warn};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const DEFAULT_EXIT_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub direction: FuzzDirection,
    pub chunk_size: usize,
    /// Base seed; the controller-bound worker uses it as is, the switch-bound one adds 1.
    pub seed: Option<u64>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            direction: FuzzDirection::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            seed: None,
        }
    }
}

impl SessionOptions {
    pub fn from_config(config: &FlowFuzzConfig) -> Self {
        Self {
            direction: config.proxy.fuzz_direction,
            chunk_size: config.fuzzer.chunk_size,
            seed: config.fuzzer.seed,
        }
    }
}

/// Two worker threads, one per direction, sharing a stop flag.
pub struct ProxySession {
    peer: Option<SocketAddr>,
    stop: Arc<AtomicBool>,
    sockets: [TcpStream; 2],
    workers: Vec<(&'static str, JoinHandle<()>)>,
}

impl ProxySession {
    pub fn spawn(
        switch: TcpStream,
        controller: TcpStream,
        ctx: FuzzContext,
        options: SessionOptions,
    ) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let peer = switch.peer_addr().ok();

        let to_controller = options.direction.fuzzes_switch_side().then(|| {
            StreamFuzzer::seeded(ctx.clone(), options.seed)
                .with_chunk_size(options.chunk_size)
                .with_label("switch->controller")
        });
        let to_switch = options.direction.fuzzes_controller_side().then(|| {
            StreamFuzzer::seeded(ctx, options.seed.map(|s| s.wrapping_add(1)))
                .with_chunk_size(options.chunk_size)
                .with_label("controller->switch")
        });

        let workers = vec![
            (
                "switch->controller",
                spawn_worker(
                    "switch->controller",
                    switch.try_clone()?,
                    controller.try_clone()?,
                    to_controller,
                    options.chunk_size,
                    Arc::clone(&stop),
                )?,
            ),
            (
                "controller->switch",
                spawn_worker(
                    "controller->switch",
                    controller.try_clone()?,
                    switch.try_clone()?,
                    to_switch,
                    options.chunk_size,
                    Arc::clone(&stop),
                )?,
            ),
        ];
        info!("Proxy session started for {peer:?} ({:?})", options.direction);

        Ok(Self {
            peer,
            stop,
            sockets: [switch, controller],
            workers,
        })
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// True once both directions have stopped.
    pub fn is_finished(&self) -> bool {
        self.workers.iter().all(|(_, handle)| handle.is_finished())
    }

    /// Raises the stop flag, closes both sockets and waits up to `timeout` for the workers.
    /// Workers still running after the deadline are detached. Returns whether every worker
    /// exited in time.
    pub fn shutdown(self, timeout: Duration) -> bool {
        self.stop.store(true, Ordering::SeqCst);
        for socket in &self.sockets {
            if let Err(e) = socket.shutdown(Shutdown::Both) {
                debug!("Socket of session {:?} already closed: {e}", self.peer);
            }
        }

        let start_time = Instant::now();
        while !self.is_finished() {
            if start_time.elapsed() > timeout {
                for (label, handle) in &self.workers {
                    if !handle.is_finished() {
                        warn!("Worker {label} of session {:?} did not exit, detaching", self.peer);
                    }
                }
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }

        for (label, handle) in self.workers {
            if handle.join().is_err() {
                error!("Worker {label} of session {:?} panicked", self.peer);
            }
        }
        info!("Proxy session for {:?} closed", self.peer);
        true
    }
}

fn spawn_worker(
    label: &'static str,
    mut from: TcpStream,
    mut to: TcpStream,
    fuzzer: Option<StreamFuzzer<rand_chacha::ChaCha8Rng>>,
    chunk_size: usize,
    stop: Arc<AtomicBool>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("flowfuzz {label}"))
        .spawn(move || {
            let result = match fuzzer {
                Some(mut fuzzer) => fuzzer.run(&mut from, &mut to, &stop),
                None => relay(&mut from, &mut to, &stop, chunk_size),
            };
            match result {
                Ok(bytes) => debug!("{label} finished after {bytes} byte(s)"),
                Err(e) => warn!("{label} stopped: {e}"),
            }
            // Propagate EOF so the peer closes its side too.
            let _ = to.shutdown(Shutdown::Write);
        })
}

/// Copies `reader` to `writer` unchanged until EOF or until `stop` is raised.
pub fn relay<Rd: Read, W: Write>(
    reader: &mut Rd,
    writer: &mut W,
    stop: &AtomicBool,
    chunk_size: usize,
) -> io::Result<u64> {
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut written = 0u64;
    while !stop.load(Ordering::Relaxed) {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(_) if stop.load(Ordering::Relaxed) => break,
            Err(e) => return Err(e),
        };
        writer.write_all(&buf[..n])?;
        writer.flush()?;
        written += n as u64;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openflow::{MessageType, OfVersion};
    use crate::rules::{CriteriaSet, Criterion, FuzzAction, Instruction, InstructionSet};
    use crate::test_support::*;
    use std::io::Cursor;
    use std::net::TcpListener;

    fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        for stream in [&client, &server] {
            stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        }
        (client, server)
    }

    fn echo_context() -> FuzzContext {
        FuzzContext::new(
            OfVersion::V1_3,
            InstructionSet::new(vec![
                Instruction::new(
                    vec![CriteriaSet::new(vec![Criterion::MessageType(
                        MessageType::EchoRequest,
                    )])],
                    vec![FuzzAction::MutateBytes {
                        include_header: false,
                    }],
                    None,
                )
                .unwrap(),
            ]),
        )
    }

    #[test]
    fn relay_copies_until_eof() {
        let input: Vec<u8> = (0..100).collect();
        let mut output = Vec::new();
        let copied = relay(&mut Cursor::new(input.clone()), &mut output, &AtomicBool::new(false), 7)
            .unwrap();
        assert_eq!(copied, 100);
        assert_eq!(output, input);
    }

    #[test]
    fn session_fuzzes_only_the_configured_direction() {
        let (mut switch, proxy_switch_side) = connected_pair();
        let (proxy_controller_side, mut controller) = connected_pair();
        let session = ProxySession::spawn(
            proxy_switch_side,
            proxy_controller_side,
            echo_context(),
            SessionOptions {
                seed: Some(3),
                ..SessionOptions::default()
            },
        )
        .unwrap();

        let echo = wire(&echo_request(vec![0; 32]));
        switch.write_all(&echo).unwrap();
        let mut received = vec![0u8; echo.len()];
        controller.read_exact(&mut received).unwrap();
        assert_eq!(&received[..8], &echo[..8]);
        assert_ne!(received, echo);

        controller.write_all(&echo).unwrap();
        let mut relayed = vec![0u8; echo.len()];
        switch.read_exact(&mut relayed).unwrap();
        assert_eq!(relayed, echo);

        assert!(!session.is_finished());
        assert!(session.shutdown(DEFAULT_EXIT_TIMEOUT));
    }

    #[test]
    fn session_ends_when_both_peers_close() {
        let (switch, proxy_switch_side) = connected_pair();
        let (proxy_controller_side, controller) = connected_pair();
        let session = ProxySession::spawn(
            proxy_switch_side,
            proxy_controller_side,
            echo_context(),
            SessionOptions::default(),
        )
        .unwrap();

        drop(switch);
        drop(controller);
        let deadline = Instant::now() + Duration::from_secs(5);
        while !session.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(session.is_finished());
        assert!(session.shutdown(Duration::from_millis(50)));
    }
}
