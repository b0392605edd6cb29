//! Throughput benchmark for the frame codec: encrypts a large buffer of
//! synthetic frames under one `AesGcmFrameCodec` and reports MB/s and
//! frames/sec, alongside a runtime hardware-crypto capability probe.

use crypto::{AesGcmFrameCodec, KeyMaterial};
use rand::{rngs::OsRng, RngCore};
use std::time::Instant;

const BENCHMARK_SIZE: usize = 256 * 1024 * 1024; // 256 MB
const CHUNK_SIZE: usize = 460_000; // ~460KB per frame (640x480 YUV420)
const FRAME_AAD: &[u8] = b"0|video";

fn main() {
    println!("=== AES-256-GCM Frame Codec Throughput Benchmark ===\n");
    crypto::capability::log_hardware_crypto_support();
    println!();

    println!("Generating {} MB of random test data...", BENCHMARK_SIZE / (1024 * 1024));
    let mut data = vec![0u8; BENCHMARK_SIZE];
    OsRng.fill_bytes(&mut data);

    let mut key_bytes = [0u8; 32];
    OsRng.fill_bytes(&mut key_bytes);
    let key_material =
        KeyMaterial::from_parts(&key_bytes, 0, "bench-peer".into()).expect("key_bytes is exactly 32 bytes");
    let codec = AesGcmFrameCodec::new(key_material);

    println!("Starting encryption benchmark...\n");

    let start = Instant::now();
    let mut total_encrypted = 0usize;
    let mut frame_count = 0u64;

    for chunk in data.chunks(CHUNK_SIZE) {
        let _wire = codec.encrypt(chunk, FRAME_AAD).expect("encryption failed");
        total_encrypted += chunk.len();
        frame_count += 1;
    }

    let duration = start.elapsed();
    let seconds = duration.as_secs_f64();
    let mb_processed = total_encrypted as f64 / (1024.0 * 1024.0);
    let throughput_mbps = mb_processed / seconds;

    println!("=== Results ===");
    println!("Total encrypted: {:.2} MB", mb_processed);
    println!("Time elapsed:    {:.3} seconds", seconds);
    println!("Throughput:      {:.2} MB/s", throughput_mbps);
    println!("Frames/sec:      {:.2} fps (@ 460KB/frame)", frame_count as f64 / seconds);
    println!();

    println!("=== Performance Analysis ===");
    if throughput_mbps > 500.0 {
        println!("EXCELLENT: consistent with active hardware AES-NI/ARMv8 acceleration");
    } else if throughput_mbps > 200.0 {
        println!("GOOD: plausible hardware-accelerated throughput");
    } else {
        println!("LOW: consistent with software-only AES-GCM; check target-cpu flags");
    }
}
