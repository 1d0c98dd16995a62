//! Neighbour exchange across N simulated devices: device 2k swaps a
//! patterned payload with device 2k+1, every round, with verification and a
//! bandwidth line per round.
//!
//! Usage: neighbour_exchange [devices] [bytes] [rounds]

use peerlink::{CommEngine, DeviceBuffer, LinkConfig, Stream};
use std::time::Instant;

fn arg(n: usize, default: usize) -> usize {
    std::env::args()
        .nth(n)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn main() -> peerlink::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let devices = arg(1, 2) as u32;
    let bytes = arg(2, 8 << 20);
    let rounds = arg(3, 5);
    assert!(
        devices >= 2 && devices % 2 == 0,
        "neighbour exchange needs an even device count"
    );

    let mut engine = CommEngine::new(LinkConfig::from_env())?;
    engine.init(devices)?;

    let mut srcs = Vec::new();
    let mut dsts = Vec::new();
    let mut streams = Vec::new();
    for d in 0..devices {
        let mut src = DeviceBuffer::alloc_zeroed(bytes)?;
        for (i, b) in src.as_mut_slice().iter_mut().enumerate() {
            *b = (d as u8).wrapping_add(0x80) ^ (i as u8).wrapping_mul(3);
        }
        srcs.push(src);
        dsts.push(DeviceBuffer::alloc_zeroed(bytes)?);
        streams.push(Stream::new()?);
    }

    for round in 0..rounds {
        let start = Instant::now();
        for d in 0..devices {
            let peer = d ^ 1;
            unsafe {
                engine.enqueue_send_recv(
                    d,
                    peer,
                    dsts[d as usize].addr(),
                    bytes,
                    peer,
                    srcs[d as usize].addr(),
                    bytes,
                )?;
            }
        }
        for d in 0..devices {
            engine.launch(d, &streams[d as usize])?;
        }
        for s in &streams {
            s.synchronize()?;
        }
        let elapsed = start.elapsed();

        for d in 0..devices as usize {
            assert_eq!(
                dsts[d].as_slice(),
                srcs[d ^ 1].as_slice(),
                "verification failed on device {d}"
            );
        }

        let ms = elapsed.as_secs_f64() * 1e3;
        let gbits = (bytes as f64 * devices as f64 * 8.0) / (elapsed.as_secs_f64() * 1e9);
        println!(
            "round {round}: data size: {:.2} Mb; time elapsed: {ms:.3} ms, bandwidth: {gbits:.3} Gb/s",
            bytes as f64 / (1024.0 * 1024.0)
        );
    }
    Ok(())
}
