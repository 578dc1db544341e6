//! Kick exchange between the host and the simulated co-processor

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use atlas_hwspinlock::SimulatedArbiter;
use atlas_ipc::sim::SimulatedCoprocessor;
use atlas_ipc::{DoorbellListener, EventDoorbell, HeapRegion, RprocIpc};

/// How long either side sleeps on its doorbell before polling anyway
const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub type HostIpc = RprocIpc<HeapRegion, Arc<SimulatedArbiter>, EventDoorbell>;
pub type Firmware = SimulatedCoprocessor<EventDoorbell>;

/// Send `kicks` kicks spread over `vqs` virtqueues and wait for every echo
///
/// The co-processor runs on its own thread. A failure on either side stops
/// the other, and the side that failed first is reported.
pub fn exchange(
    host: &mut HostIpc,
    host_bell: &DoorbellListener,
    mut peer: Firmware,
    peer_bell: DoorbellListener,
    kicks: u32,
    vqs: u32,
) -> anyhow::Result<u64> {
    anyhow::ensure!(vqs > 0, "need at least one virtqueue");
    let stop = AtomicBool::new(false);

    crossbeam::scope(|s| {
        let stop = &stop;
        let firmware = s.spawn(move |_| -> anyhow::Result<()> {
            let mut echoed = 0;
            while echoed < kicks as usize {
                if stop.load(Ordering::Acquire) {
                    log::debug!("co-processor: host stopped after {} echoes", echoed);
                    return Ok(());
                }
                peer_bell.wait(POLL_INTERVAL);
                match peer.echo() {
                    Ok(n) => echoed += n,
                    Err(err) => {
                        stop.store(true, Ordering::Release);
                        return Err(anyhow::Error::new(err).context("co-processor echo"));
                    }
                }
            }
            Ok(())
        });

        let received = drive_host(host, host_bell, kicks, vqs, stop);
        if received.is_err() {
            stop.store(true, Ordering::Release);
        }

        firmware
            .join()
            .map_err(|_| anyhow::anyhow!("co-processor thread panicked"))??;
        received
    })
    .map_err(|_| anyhow::anyhow!("simulation thread panicked"))?
}

fn drive_host(
    host: &mut HostIpc,
    bell: &DoorbellListener,
    kicks: u32,
    vqs: u32,
    stop: &AtomicBool,
) -> anyhow::Result<u64> {
    let mut received = 0u64;

    for i in 0..kicks {
        loop {
            match host.kick(i % vqs) {
                Ok(()) => break,
                Err(err) if err.is_retryable() => {
                    if stop.load(Ordering::Acquire) {
                        anyhow::bail!("co-processor stopped");
                    }
                    received += host.poll(|_| {}).context("host poll")? as u64;
                    std::thread::yield_now();
                }
                Err(err) => return Err(anyhow::Error::new(err).context("host kick")),
            }
        }
        received += host.poll(|_| {}).context("host poll")? as u64;
    }

    while received < u64::from(kicks) {
        if stop.load(Ordering::Acquire) {
            anyhow::bail!("co-processor stopped with {} echoes missing", u64::from(kicks) - received);
        }
        bell.wait(POLL_INTERVAL);
        received += host.poll(|_| {}).context("host poll")? as u64;
    }
    Ok(received)
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_ipc::sim::SimulatedLink;
    use atlas_ipc::{FifoError, RprocConfig};

    fn link() -> (SimulatedLink<EventDoorbell, EventDoorbell>, DoorbellListener, DoorbellListener) {
        let (to_peer, peer_bell) = EventDoorbell::pair();
        let (to_host, host_bell) = EventDoorbell::pair();
        let link = SimulatedLink::new(RprocConfig::default(), to_peer, to_host).unwrap();
        (link, host_bell, peer_bell)
    }

    #[test]
    fn test_exchange_completes() {
        let (link, host_bell, peer_bell) = link();
        let SimulatedLink {
            bank,
            mut host,
            peer,
            ..
        } = link;

        let received = exchange(&mut host, &host_bell, peer, peer_bell, 200, 3).unwrap();
        assert_eq!(received, 200);
        assert_eq!(host.tx_stats().writes, 200);
        host.teardown(&bank).unwrap();
    }

    #[test]
    fn test_lock_timeout_ends_exchange() {
        let (link, host_bell, peer_bell) = link();
        let SimulatedLink {
            arbiter,
            mut host,
            peer,
            ..
        } = link;

        let tx_lock = host.config().tx_lock;
        assert!(arbiter.hold(tx_lock));
        let err = exchange(&mut host, &host_bell, peer, peer_bell, 10, 1).unwrap_err();
        arbiter.release(tx_lock);

        assert!(err
            .chain()
            .any(|cause| cause.downcast_ref::<FifoError>().map_or(false, FifoError::is_fatal)));
    }

    #[test]
    fn test_zero_virtqueues_rejected() {
        let (link, host_bell, peer_bell) = link();
        let SimulatedLink { mut host, peer, .. } = link;
        assert!(exchange(&mut host, &host_bell, peer, peer_bell, 1, 0).is_err());
    }
}
