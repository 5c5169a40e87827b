use std::error::Error;

use byteorder::{BigEndian, ByteOrder};
use structopt::StructOpt;

use crypto1::cipher::Crypto1;

/// Traces a MIFARE Classic authentication: prints the encrypted card
/// nonce, the register state after each stage, and the keystream that
/// would encrypt the following traffic.
#[derive(StructOpt, Debug)]
#[structopt(name = "crypto1-trace", max_term_width = 80)]
struct Args {
    /// 6-byte sector key, as 12 hex digits.
    key: String,
    /// 4-byte card UID, as 8 hex digits.
    uid: String,
    /// 4-byte card nonce, as 8 hex digits.
    nonce: String,
    /// Run a nested authentication, emitting encrypted parity bits.
    #[structopt(long)]
    nested: bool,
    /// With --nested, treat the nonce as ciphertext (the reader's view of
    /// a nested handshake).
    #[structopt(long)]
    decrypt: bool,
    /// Encrypted reader nonce to absorb after setup, as 8 hex digits.
    #[structopt(long)]
    reader_nonce: Option<String>,
    /// Number of keystream bytes to print at the end of the trace.
    #[structopt(long, default_value = "16")]
    keystream: usize,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::from_args();

    let key = fixed::<6>(&args.key, "key")?;
    let uid = fixed::<4>(&args.uid, "uid")?;
    let mut nonce = fixed::<4>(&args.nonce, "nonce")?;

    println!("key   {}", hex(&key));
    println!("uid   {}  ({:08x})", hex(&uid), BigEndian::read_u32(&uid));
    println!(
        "nt    {}  ({:08x})",
        hex(&nonce),
        BigEndian::read_u32(&nonce)
    );

    let mut state = if args.nested {
        let mut parity = [0u8; 4];
        let state = Crypto1::setup_nested(&key, &uid, &mut nonce, &mut parity, args.decrypt);
        println!("nt'   {}  (encrypted)", hex(&nonce));
        println!(
            "par   {} {} {} {}  (encrypted parity bits)",
            parity[0], parity[1], parity[2], parity[3]
        );
        state
    } else {
        let state = Crypto1::setup(&key, &uid, &mut nonce);
        println!("nt'   {}  (encrypted)", hex(&nonce));
        state
    };
    println!("lfsr  {:012x}  (after setup)", state.lfsr());

    if let Some(nr) = &args.reader_nonce {
        let nr = fixed::<4>(nr, "reader nonce")?;
        state.absorb_reader_nonce(&nr);
        println!("nr'   {}  (absorbed)", hex(&nr));
        println!("lfsr  {:012x}  (after reader nonce)", state.lfsr());
    }

    if args.keystream > 0 {
        let ks: Vec<u8> = (0..args.keystream)
            .map(|_| state.keystream_byte())
            .collect();
        println!("ks    {}", hex(&ks));
    }

    Ok(())
}

/// Parses exactly `N` bytes of hex, tolerating an 0x prefix.
fn fixed<const N: usize>(s: &str, what: &str) -> Result<[u8; N], Box<dyn Error>> {
    let s = s.trim_start_matches("0x");
    if s.len() != 2 * N {
        return Err(format!("{} must be {} hex digits, got {:?}", what, 2 * N, s).into());
    }
    let mut out = [0u8; N];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&s[2 * i..2 * i + 2], 16)
            .map_err(|e| format!("bad {} byte {}: {}", what, i, e))?;
    }
    Ok(out)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
