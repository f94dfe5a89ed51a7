/// Synthetic packet trace generator
///
/// Writes a tab-separated trace of interleaved TCP connections with random
/// loss and reordering to stdout or a file. Useful for exercising and
/// benchmarking the analyser.
///
/// Usage: trace_generator [OUTPUT|stdout] [PACKETS] [LOSS]

use std::env;
use std::fs::File;
use std::io::{BufWriter, Write};
use rand::Rng;

const CONNECTIONS: usize = 16;
const MAX_SEGMENT: u64 = 1460;
const HEADER_LEN: u64 = 40;

struct Conn {
    src_host: u8,
    src_port: u16,
    dst_host: u8,
    next_seq: u64,
    remaining: u32,
}

fn main() -> std::io::Result<()> {
    let args: Vec<String> = env::args().collect();

    let output_path = if args.len() > 1 {
        args[1].clone()
    } else {
        "/tmp/trace-generated.txt".to_string()
    };

    let packet_count: usize = if args.len() > 2 {
        args[2].parse().unwrap_or(10000)
    } else {
        10000
    };

    let loss: f64 = if args.len() > 3 {
        args[3].parse().unwrap_or(0.001)
    } else {
        0.001
    };

    let mut output: Box<dyn Write> = if output_path == "stdout" {
        Box::new(std::io::stdout())
    } else {
        Box::new(BufWriter::new(File::create(&output_path)?))
    };

    let mut rng = rand::thread_rng();
    let mut conns: Vec<Conn> = Vec::with_capacity(CONNECTIONS);
    let mut held: Option<String> = None;
    let mut dropped = 0usize;
    let mut timestamp = 0.0f64;

    eprintln!("Generating {} packets to {} ({:.3}% loss)", packet_count, output_path, loss * 100.0);

    for i in 0..packet_count {
        timestamp += rng.gen_range(0.0001..0.01);

        if conns.len() < CONNECTIONS {
            conns.push(Conn {
                src_host: rng.gen(),
                src_port: rng.gen_range(32768..61000),
                dst_host: rng.gen(),
                next_seq: 0,
                remaining: rng.gen_range(5..500),
            });
        }

        let idx = rng.gen_range(0..conns.len());
        let conn = &mut conns[idx];

        let (payload, header, close) = if conn.next_seq == 0 {
            (0, 0, 0)
        } else if conn.remaining == 0 {
            (0, HEADER_LEN, 2)
        } else {
            (rng.gen_range(1..=MAX_SEGMENT), HEADER_LEN, 0)
        };

        let line = format!(
            "{}\t{:.6}\t192.168.0.{}\t{}\t10.0.1.{}\t80\t0\t0\t{}\t0\t0\t{}\t0\t{}\t{}\n",
            i, timestamp, conn.src_host, conn.src_port, conn.dst_host, payload, header, conn.next_seq, close
        );

        conn.next_seq = if conn.next_seq == 0 { 1 } else { conn.next_seq + payload + header };
        conn.remaining = conn.remaining.saturating_sub(1);
        let finished = close == 2;

        if conn.next_seq > 1 && rng.gen_bool(loss) {
            dropped += 1;
        } else if held.is_none() && rng.gen_bool(0.01) {
            // swap with the next packet written
            held = Some(line);
        } else {
            output.write_all(line.as_bytes())?;
            if let Some(prev) = held.take() {
                output.write_all(prev.as_bytes())?;
            }
        }

        if finished {
            conns.swap_remove(idx);
        }

        if i % 100000 == 0 && i > 0 {
            eprintln!("Generated {} packets", i);
        }
    }

    if let Some(prev) = held.take() {
        output.write_all(prev.as_bytes())?;
    }
    output.flush()?;

    eprintln!("Trace generation complete: {} packets, {} dropped", packet_count, dropped);

    Ok(())
}
