#![no_std]
#![no_main]

use user::*;

/// Forks a child that exits immediately; the parent sleeps without calling `wait`,
/// so the child sits in the ZOMBIE state (reaped only when the parent eventually
/// exits and `init` inherits and waits on it) long enough for `ps` to observe it.
#[unsafe(no_mangle)]
fn main(_args: Args) {
    if fork().expect("zombie: fork failed") > 0 {
        let _ = sleep(5);
    }
    exit(0);
}
