use std::{env, fs, process};

use log::{LevelFilter, error};
use segalloc::{Arena, SegregatedAllocator, StderrLogger, Trace};

const BUILTIN: &str = "
  20000
  4
  10
  1
  a 0 512
  a 1 128
  a 2 2040
  r 0 640
  f 1
  a 3 96
  r 2 6000
  f 0
  f 3
  f 2
";

fn main() {
  let verbose = env::args().any(|arg| arg == "-v");
  let level = if verbose { LevelFilter::Trace } else { LevelFilter::Info };
  StderrLogger::new(level).init().unwrap();

  let text = match env::args().skip(1).find(|arg| arg != "-v") {
    Some(path) => match fs::read_to_string(&path) {
      Ok(text) => text,
      Err(err) => {
        error!("cannot read {path}: {err}");
        process::exit(1);
      }
    },
    None => BUILTIN.to_owned(),
  };

  let trace: Trace = match text.parse() {
    Ok(trace) => trace,
    Err(err) => {
      error!("bad trace: {err}");
      process::exit(1);
    }
  };

  let mut allocator = SegregatedAllocator::init(Arena::new()).unwrap();
  match trace.replay(&mut allocator, true) {
    Ok(stats) => {
      allocator.log_heap();
      println!(
        "{} ops, peak {} bytes live, heap {} bytes, utilization {:.1}%",
        stats.ops,
        stats.peak_live_bytes,
        stats.heap_bytes,
        stats.utilization() * 100.0
      );
    }
    Err(err) => {
      error!("replay failed: {err}");
      process::exit(1);
    }
  }
}
