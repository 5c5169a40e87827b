use std::error::Error;

use structopt::StructOpt;

use crypto1::prng::{successor, ValidNonces};

/// Enumerates the card nonces consistent with a captured parity-leak
/// pattern, as used when sieving nested-authentication captures.
#[derive(StructOpt, Debug)]
#[structopt(name = "crypto1-nonces", max_term_width = 80)]
struct Args {
    /// Leak pattern, as hex (one bit per captured parity).
    pattern: String,
    /// Number of valid bits in the pattern.
    #[structopt(default_value = "8")]
    width: u32,
    /// Stop after printing this many nonces.
    #[structopt(long)]
    limit: Option<usize>,
    /// Print only the number of matching nonces.
    #[structopt(long)]
    count: bool,
    /// Also print the n-th PRNG successor next to each nonce.
    #[structopt(long)]
    successors: Option<u32>,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::from_args();

    if args.width > 32 {
        return Err(format!("width {} exceeds the 32-bit pattern", args.width).into());
    }
    let pattern = u32::from_str_radix(args.pattern.trim_start_matches("0x"), 16)
        .map_err(|e| format!("bad pattern {:?}: {}", args.pattern, e))?;

    let nonces = ValidNonces::new(pattern, args.width);

    if args.count {
        println!("{}", nonces.count());
        return Ok(());
    }

    let limit = args.limit.unwrap_or(usize::MAX);
    for nt in nonces.take(limit) {
        match args.successors {
            Some(n) => println!("{:08x} {:08x}", nt, successor(nt, n)),
            None => println!("{:08x}", nt),
        }
    }

    Ok(())
}
