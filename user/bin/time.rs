#![no_std]
#![no_main]

use user::*;

#[unsafe(no_mangle)]
fn main(args: Args) {
    if args.len() < 2 {
        exit_with_msg("usage: time cmd args...");
    }

    let cmd = args.get_str(1).expect("cmd to be str");

    let mut argv = [""; 16];
    let mut argc = 0;
    for arg in args.args_as_str().take(argv.len()) {
        argv[argc] = arg;
        argc += 1;
    }

    let start = uptime();

    let pid = fork().expect("time: fork failed");
    if pid == 0 {
        exec(cmd, &argv[..argc]);
        exit_with_msg("time: exec failed");
    }

    let mut status = 0;
    if wait(&mut status).is_err() {
        exit_with_msg("time: wait failed");
    }

    let elapsed = (uptime() - start) as u64;
    let ticks_per_sec = TICKS_PER_SEC as u64;
    let secs = elapsed / ticks_per_sec;
    let millis = (elapsed % ticks_per_sec) * 1000 / ticks_per_sec;

    println!("{} executed in {}.{:03}s", cmd, secs, millis);
}
