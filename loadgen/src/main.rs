// loadgen/src/main.rs
use std::cell::{Cell, RefCell};
use std::error::Error;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use structopt::StructOpt;

use loadgen::{render_line, total_lines, Distribution, Generator};

/// Append log lines to a file at a steady rate, for feeding `log-shipper`.
#[derive(StructOpt)]
struct Args {
    /// The file to append to. It is created if it doesn't exist.
    #[structopt(long, parse(from_os_str))]
    file: PathBuf,

    #[structopt(long)]
    avg_lines_per_second: u32,

    /// `uniform` or `linear`.
    #[structopt(long)]
    distribution: Distribution,

    #[structopt(long)]
    seconds: u64,

    #[structopt(long)]
    streams: u32,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::from_args();

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&args.file)?;
    let file = Rc::new(RefCell::new(file));
    let written = Rc::new(Cell::new(0_u32));

    let emit = {
        let file = Rc::clone(&file);
        let written = Rc::clone(&written);
        move |stream, sequence| -> io::Result<()> {
            let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
            writeln!(file.borrow_mut(), "{}", render_line(&timestamp, stream, sequence))?;
            written.set(written.get() + 1);
            Ok(())
        }
    };

    let total_lines = total_lines(args.avg_lines_per_second, args.seconds).ok_or_else(|| {
        format!(
            "cannot write {} lines per second for {} seconds",
            args.avg_lines_per_second, args.seconds
        )
    })?;
    let gen = Generator::new(
        Duration::from_secs(args.seconds),
        args.streams,
        total_lines,
        args.distribution,
        emit,
    );

    smol::block_on(gen.run())?;
    file.borrow_mut().flush()?;

    println!("Wrote {} lines to {}", written.get(), args.file.display());

    Ok(())
}
