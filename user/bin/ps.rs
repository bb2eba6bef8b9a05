#![no_std]
#![no_main]

use user::*;

const DEFAULT_MAX: usize = NPROC;
const NPROC: usize = 64;

/// Renders a tick count as `<seconds>.<millis>` to 3 decimal places, per spec.md
/// §6's `ps`/`time` formatting contract.
fn fmt_ticks(ticks: u64) -> (u64, u64) {
    let ticks_per_sec = TICKS_PER_SEC as u64;
    let secs = ticks / ticks_per_sec;
    let millis = (ticks % ticks_per_sec) * 1000 / ticks_per_sec;
    (secs, millis)
}

fn name_str(name: &[u8]) -> &str {
    let len = name.iter().position(|&c| c == 0).unwrap_or(name.len());
    core::str::from_utf8(&name[..len]).unwrap_or("?")
}

fn state_str(state: &[u8]) -> &str {
    let len = state.iter().position(|&c| c == 0).unwrap_or(state.len());
    core::str::from_utf8(&state[..len]).unwrap_or("?")
}

#[unsafe(no_mangle)]
fn main(args: Args) {
    let max = args.get_str(1).and_then(|s| s.parse().ok()).unwrap_or(DEFAULT_MAX).min(NPROC);

    let mut buf = [const {
        RawProc {
            pid: 0,
            ppid: 0,
            uid: 0,
            gid: 0,
            size: 0,
            start_ticks: 0,
            cpu_ticks: 0,
            state: [0; 8],
            name: [0; PROCNAME],
        }
    }; NPROC];

    let Ok(count) = getprocs(&mut buf[..max]) else {
        exit_with_msg("ps: getprocs failed");
    };

    let now = uptime() as u64;

    println!("PID\tName\tUID\tGID\tPPID\tElapsed\tCPU\tState\tSize");
    for p in &buf[..count] {
        let (el_s, el_ms) = fmt_ticks(now.saturating_sub(p.start_ticks));
        let (cpu_s, cpu_ms) = fmt_ticks(p.cpu_ticks);

        println!(
            "{}\t{}\t{}\t{}\t{}\t{}.{:03}\t{}.{:03}\t{}\t{}",
            p.pid,
            name_str(&p.name),
            p.uid,
            p.gid,
            p.ppid,
            el_s,
            el_ms,
            cpu_s,
            cpu_ms,
            state_str(&p.state),
            p.size,
        );
    }
}
