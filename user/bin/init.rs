#![no_std]
#![no_main]

use user::*;

#[unsafe(no_mangle)]
fn main(_args: Args) {
    if open("console", OpenFlag::READ_WRITE).is_err() {
        mknod("console", CONSOLE as usize, 0).expect("init: cannot create console");
        open("console", OpenFlag::READ_WRITE).expect("init: cannot open console");
    }

    dup(Fd::STDIN).expect("init: dup stdout");
    dup(Fd::STDIN).expect("init: dup stderr");

    loop {
        let Ok(pid) = fork() else {
            exit_with_msg("init: fork failed");
        };

        if pid == 0 {
            exec("/sh", &["sh"]);
            exit_with_msg("init: exec sh failed");
        }

        loop {
            // returns when the shell exits, or when a reparented orphan exits
            let wpid = wait(&mut 0);
            match wpid {
                Ok(wpid) if wpid == pid => break, // shell exited; restart it
                Ok(_) => continue,
                Err(_) => exit_with_msg("init: wait error"),
            }
        }
    }
}
