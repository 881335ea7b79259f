//! Key bootstrap binary for the Sentinel registry
//!
//! `sentinel-keygen [bits]` prints a fresh PKCS#1 private key followed by
//! its SPKI public key. The private key is what `SENTINEL_PRIVATE_KEY_PATH`
//! expects.
//!
//! `sentinel-keygen admin-token <user>` prints the admin token derived for
//! `user` from `SENTINEL_ADMIN_SECRET`.

use sentinel_core::crypto::DEFAULT_KEY_BITS;
use sentinel_core::{generate_admin_token, ServiceSigner};
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.first().map(String::as_str) {
        Some("admin-token") => {
            let Some(user) = args.get(1) else {
                eprintln!("usage: sentinel-keygen admin-token <user>");
                return ExitCode::from(2);
            };
            let Ok(secret) = std::env::var("SENTINEL_ADMIN_SECRET") else {
                eprintln!("SENTINEL_ADMIN_SECRET is not set");
                return ExitCode::from(2);
            };
            match generate_admin_token(user, &secret) {
                Ok(token) => {
                    println!("{token}");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("token derivation failed: {e}");
                    ExitCode::FAILURE
                }
            }
        }
        bits => {
            let bits = match bits.map(str::parse::<usize>) {
                None => DEFAULT_KEY_BITS,
                Some(Ok(bits)) => bits,
                Some(Err(e)) => {
                    eprintln!("invalid key size: {e}");
                    return ExitCode::from(2);
                }
            };
            let pems = ServiceSigner::generate_with_bits(bits).and_then(|signer| {
                Ok((signer.private_key_pem()?, signer.public_key_pem().to_string()))
            });
            match pems {
                Ok((private_pem, public_pem)) => {
                    print!("{private_pem}");
                    print!("{public_pem}");
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("key generation failed: {e}");
                    ExitCode::FAILURE
                }
            }
        }
    }
}
