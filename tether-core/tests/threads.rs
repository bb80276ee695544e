mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{init_tracing, pump_until, record};
use crossbeam::channel;
use tether_core::{Address, Host, Packet, PacketFlags};

#[test]
fn hosts_on_separate_threads() -> anyhow::Result<()> {
    init_tracing();
    let stop = Arc::new(AtomicBool::new(false));
    let (address_tx, address_rx) = channel::bounded(1);

    let server_stop = stop.clone();
    let server = thread::spawn(move || -> anyhow::Result<()> {
        let mut server = Host::bind(Address::any(0), 8)?;
        server.on_receive(|mut peer, packet, channel| {
            let mut echo = packet.duplicate().unwrap();
            peer.send(&mut echo, channel).unwrap();
        });
        address_tx.send(Address::localhost(server.address().port()))?;
        while !server_stop.load(Ordering::SeqCst) {
            server.service(Duration::from_millis(10), None)?;
        }
        Ok(())
    });

    let address = address_rx.recv()?;
    let clients: Vec<_> = (0..3u8)
        .map(|n| {
            thread::spawn(move || -> anyhow::Result<()> {
                let mut client = Host::new(1)?;
                let log = record(&mut client);
                let id = client.connect(address)?.id();
                anyhow::ensure!(
                    pump_until(&mut [&mut client], || !log.connects().is_empty()),
                    "client {n} never connected"
                );
                for i in 0..10u8 {
                    let mut packet = Packet::new(&[n, i], PacketFlags::RELIABLE)?;
                    if let Some(mut peer) = client.peer(id) {
                        peer.send(&mut packet, 0)?;
                    }
                }
                assert!(pump_until(&mut [&mut client], || log.payloads().len() == 10));
                let expected: Vec<Vec<u8>> = (0..10u8).map(|i| vec![n, i]).collect();
                assert_eq!(log.payloads(), expected);
                Ok(())
            })
        })
        .collect();
    for client in clients {
        client.join().expect("client thread panicked")?;
    }
    stop.store(true, Ordering::SeqCst);
    server.join().expect("server thread panicked")?;
    Ok(())
}
