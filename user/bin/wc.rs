#![no_std]
#![no_main]

use user::*;

fn wc(fd: Fd, name: &str) {
    let mut l = 0;
    let mut w = 0;
    let mut c = 0;
    let mut in_word = false;

    let mut buf = [0u8; 512];

    loop {
        let n = match read(fd, &mut buf) {
            Ok(n) => n,
            Err(_) => exit_with_msg("wc: read error"),
        };

        if n == 0 {
            println!("{} {} {} {}", l, w, c, name);
            return;
        }

        let mut term = [0u8; 513];
        term[..n].copy_from_slice(&buf[..n]);

        match unsafe { str_from_cstr(&term) } {
            Ok(s) => {
                c += s.len();
                l += s.chars().filter(|&ch| ch == '\n').count();
                w += s.split_whitespace().count();

                if in_word && s.starts_with(|ch: char| !ch.is_whitespace()) {
                    w -= 1;
                }

                in_word = s.ends_with(|ch: char| !ch.is_whitespace());
            }
            Err(_) => {
                c += n;
                l += buf[..n].iter().filter(|&&b| b == b'\n').count();
                w += buf[..n].split(|&b| b.is_ascii_whitespace()).filter(|s| !s.is_empty()).count();

                if in_word && !buf[0].is_ascii_whitespace() {
                    w -= 1;
                }

                in_word = !buf[n - 1].is_ascii_whitespace();
            }
        }
    }
}

#[unsafe(no_mangle)]
fn main(args: Args) {
    if args.len() <= 1 {
        wc(Fd::STDIN, "");
        exit(0);
    }

    for name in args.args_as_str() {
        let Ok(fd) = open(name, OpenFlag::READ_ONLY) else {
            eprintln!("wc: cannot open {}", name);
            exit(1);
        };
        wc(fd, name);
        let _ = close(fd);
    }
}
