#![no_std]
#![no_main]

use user::*;

#[unsafe(no_mangle)]
fn main(_args: Args) {
    let ticks = uptime();
    println!("{}.{:03}", ticks / TICKS_PER_SEC, (ticks % TICKS_PER_SEC) * (1000 / TICKS_PER_SEC));
}
