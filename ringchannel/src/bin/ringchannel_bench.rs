//! Ring throughput and round-trip latency over shared memory.
//!
//! Usage:
//!     cargo run --release --bin ringchannel-bench
//!
//! Environment variables:
//!     PRODUCER_CPU=0  Pin producer to CPU 0 (default: 0)
//!     CONSUMER_CPU=2  Pin consumer to CPU 2 (default: 2)

use std::env;
use std::hint;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use minstant::Instant;

use ringchannel::ipc::region::SharedChannel;
use ringchannel::ipc::shmem::{ShmError, ShmPath};
use ringchannel::{Message, Parser, Transmitter};

const QUEUE_SIZE: usize = 1 << 15;
const ITERATIONS: u32 = 1 << 24;

fn get_cpu_affinity() -> (Option<usize>, Option<usize>) {
    let producer_cpu = env::var("PRODUCER_CPU")
        .ok()
        .and_then(|s| s.parse().ok())
        .or(Some(0));
    let consumer_cpu = env::var("CONSUMER_CPU")
        .ok()
        .and_then(|s| s.parse().ok())
        .or(Some(2));
    (producer_cpu, consumer_cpu)
}

fn pin_to_cpu(cpu: Option<usize>) {
    if let Some(id) = cpu {
        core_affinity::set_for_current(core_affinity::CoreId { id });
    }
}

fn unique_path(tag: &str) -> Result<ShmPath, ShmError> {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    ShmPath::new(format!(
        "/ringchannel-{}-{}-{}",
        tag,
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ))
}

/// Checks that payloads arrive as a gapless sequence.
struct Sequence {
    next: u32,
}

impl Parser for Sequence {
    fn parse(&mut self, message: &Message) {
        let value = message.payload.as_u32();
        assert_eq!(value, Some(self.next), "data corruption");
        self.next += 1;
    }
}

/// Sends every message straight back on another channel.
struct Echo<'a> {
    reply: &'a Transmitter<'a>,
}

impl Parser for Echo<'_> {
    fn parse(&mut self, message: &Message) {
        while self.reply.try_send(message.id.0, message.payload).is_err() {
            hint::spin_loop();
        }
    }
}

fn bench_throughput(producer_cpu: Option<usize>, consumer_cpu: Option<usize>) -> Result<(), ShmError> {
    let path = unique_path("throughput")?;
    let region = SharedChannel::<QUEUE_SIZE, _>::create(path.clone())?;
    let tx = region.transmit_only();

    let ready = Arc::new(AtomicBool::new(false));
    let ready_clone = ready.clone();

    let consumer_thread = std::thread::spawn(move || {
        let region = SharedChannel::<QUEUE_SIZE, _>::open(path).unwrap();
        let mut rx = region.receive_only(Sequence { next: 0 });
        pin_to_cpu(consumer_cpu);

        ready_clone.store(true, Ordering::Release);

        while rx.parser().next < ITERATIONS {
            if rx.drain() == 0 {
                hint::spin_loop();
            }
        }
    });

    while !ready.load(Ordering::Acquire) {
        hint::spin_loop();
    }

    pin_to_cpu(producer_cpu);

    let start = Instant::now();

    for i in 0..ITERATIONS {
        while tx.try_send(0, i).is_err() {
            hint::spin_loop();
        }
    }

    consumer_thread.join().unwrap();
    let elapsed = start.elapsed();

    let ops_per_ms = u128::from(ITERATIONS) * 1_000_000 / elapsed.as_nanos();
    println!("{ops_per_ms} ops/ms ({} refused sends)", tx.rejected());
    Ok(())
}

fn bench_rtt(producer_cpu: Option<usize>, consumer_cpu: Option<usize>) -> Result<(), ShmError> {
    let q1_path = unique_path("q1")?;
    let q2_path = unique_path("q2")?;

    let q1 = SharedChannel::<QUEUE_SIZE, _>::create(q1_path.clone())?;
    let q2 = SharedChannel::<QUEUE_SIZE, _>::create(q2_path.clone())?;
    let tx = q1.transmit_only();

    let ready = Arc::new(AtomicBool::new(false));
    let done = Arc::new(AtomicBool::new(false));
    let ready_clone = ready.clone();
    let done_clone = done.clone();

    let responder = std::thread::spawn(move || {
        let q1 = SharedChannel::<QUEUE_SIZE, _>::open(q1_path).unwrap();
        let q2 = SharedChannel::<QUEUE_SIZE, _>::open(q2_path).unwrap();
        let reply = q2.transmit_only();
        let mut rx = q1.receive_only(Echo { reply: &reply });
        pin_to_cpu(consumer_cpu);

        ready_clone.store(true, Ordering::Release);

        while !done_clone.load(Ordering::Acquire) {
            if rx.drain() == 0 {
                hint::spin_loop();
            }
        }
    });

    while !ready.load(Ordering::Acquire) {
        hint::spin_loop();
    }

    let mut rx = q2.receive_only(Sequence { next: 0 });

    pin_to_cpu(producer_cpu);

    let start = Instant::now();

    for i in 0..ITERATIONS {
        tx.send_u32(0, i);
        while rx.drain() == 0 {
            hint::spin_loop();
        }
    }

    let elapsed = start.elapsed();
    done.store(true, Ordering::Release);
    responder.join().unwrap();

    let rtt_ns = elapsed.as_nanos() / u128::from(ITERATIONS);
    println!("{rtt_ns} ns RTT");
    Ok(())
}

fn main() -> Result<(), ShmError> {
    ringchannel::init_tracing();

    let (producer_cpu, consumer_cpu) = get_cpu_affinity();

    println!("ringchannel (size={QUEUE_SIZE}, iters={ITERATIONS}):");
    bench_throughput(producer_cpu, consumer_cpu)?;
    bench_rtt(producer_cpu, consumer_cpu)?;
    Ok(())
}
