#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Once;
use std::time::{Duration, Instant};

use tether_core::{Address, Compressor, Host, Packet, Peer, PeerId};

pub const PUMP_DEADLINE: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Loopback address clients use to reach `host`.
pub fn reach(host: &Host) -> Address {
    Address::localhost(host.address().port())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connect {
        id: PeerId,
        address: Address,
        data: u32,
    },
    Receive {
        id: PeerId,
        channel: u8,
        data: Vec<u8>,
        locked: bool,
    },
    Disconnect {
        id: PeerId,
        data: u32,
    },
}

/// Shared log of the events a host delivered.
#[derive(Debug, Clone, Default)]
pub struct Log(Rc<RefCell<Vec<Event>>>);

impl Log {
    pub fn events(&self) -> Vec<Event> {
        self.0.borrow().clone()
    }

    pub fn connects(&self) -> Vec<PeerId> {
        self.0
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Event::Connect { id, .. } => Some(*id),
                _ => None,
            })
            .collect()
    }

    pub fn disconnects(&self) -> Vec<(PeerId, u32)> {
        self.0
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Event::Disconnect { id, data } => Some((*id, *data)),
                _ => None,
            })
            .collect()
    }

    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.0
            .borrow()
            .iter()
            .filter_map(|e| match e {
                Event::Receive { data, .. } => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: Event) {
        self.0.borrow_mut().push(event);
    }
}

/// Record every event on `host`.
pub fn record(host: &mut Host) -> Log {
    record_with(host, |_, _, _| {})
}

/// Record every event on `host`; `on_receive` runs after each receive is logged.
pub fn record_with<F>(host: &mut Host, mut on_receive: F) -> Log
where
    F: FnMut(Peer<'_>, &Packet, u8) + 'static,
{
    let log = Log::default();
    let l = log.clone();
    host.on_connect(move |peer, data| {
        l.push(Event::Connect {
            id: peer.id(),
            address: peer.address(),
            data,
        })
    });
    let l = log.clone();
    host.on_disconnect(move |info, data| l.push(Event::Disconnect { id: info.id(), data }));
    let l = log.clone();
    host.on_receive(move |peer, packet, channel| {
        l.push(Event::Receive {
            id: peer.id(),
            channel,
            data: packet.data().to_vec(),
            locked: packet.is_locked(),
        });
        on_receive(peer, &packet, channel);
    });
    log
}

/// Service every host in turn until `done` holds. Returns false on deadline.
pub fn pump_until(hosts: &mut [&mut Host], mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + PUMP_DEADLINE;
    while Instant::now() < deadline {
        for host in hosts.iter_mut() {
            host.service(Duration::from_millis(5), None).unwrap();
        }
        if done() {
            return true;
        }
    }
    false
}

/// Service every host for `span`.
pub fn pump_for(hosts: &mut [&mut Host], span: Duration) {
    let deadline = Instant::now() + span;
    while Instant::now() < deadline {
        for host in hosts.iter_mut() {
            host.service(Duration::from_millis(5), None).unwrap();
        }
    }
}

/// Server on an ephemeral port and a client connected to it.
pub fn connected_pair(peer_limit: usize) -> (Host, Log, Host, Log, PeerId) {
    let mut server = Host::bind(Address::any(0), peer_limit).unwrap();
    let server_log = record(&mut server);
    let mut client = Host::new(1).unwrap();
    let client_log = record(&mut client);
    let id = client.connect(reach(&server)).unwrap().id();
    assert!(pump_until(&mut [&mut server, &mut client], || {
        server_log.connects().len() == 1 && client_log.connects().len() == 1
    }));
    (server, server_log, client, client_log, id)
}

/// Run-length encoding: (count, byte) pairs.
#[derive(Debug, Default)]
pub struct RunLength;

impl Compressor for RunLength {
    fn compress(&mut self, input: &[&[u8]], _input_len: usize, output: &mut [u8]) -> usize {
        let mut written = 0;
        let mut run: Option<(u8, u8)> = None;
        for &byte in input.iter().flat_map(|b| b.iter()) {
            run = match run {
                Some((value, count)) if value == byte && count < u8::MAX => Some((value, count + 1)),
                Some((value, count)) => {
                    if written + 2 > output.len() {
                        return 0;
                    }
                    output[written] = count;
                    output[written + 1] = value;
                    written += 2;
                    Some((byte, 1))
                }
                None => Some((byte, 1)),
            };
        }
        if let Some((value, count)) = run {
            if written + 2 > output.len() {
                return 0;
            }
            output[written] = count;
            output[written + 1] = value;
            written += 2;
        }
        written
    }

    fn decompress(&mut self, input: &[u8], output: &mut [u8]) -> usize {
        let mut written = 0;
        for pair in input.chunks(2) {
            let [count, value] = pair else {
                return 0;
            };
            let count = *count as usize;
            if written + count > output.len() {
                return 0;
            }
            output[written..written + count].fill(*value);
            written += count;
        }
        written
    }
}

/// Never manages to compress anything.
#[derive(Debug, Default)]
pub struct Incompressible;

impl Compressor for Incompressible {
    fn compress(&mut self, _: &[&[u8]], _: usize, _: &mut [u8]) -> usize {
        0
    }

    fn decompress(&mut self, _: &[u8], _: &mut [u8]) -> usize {
        0
    }
}
