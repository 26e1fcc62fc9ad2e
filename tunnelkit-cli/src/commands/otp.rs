//! `tunnelkit otp-enroll`: generates a random TOTP secret and prints its `otpauth://`
//! setup URL plus a block-character QR code for scanning into an authenticator app.

use ansi_term::Color::{Black, White};
use ansi_term::Style;
use anyhow::{Context, Result};
use data_encoding::BASE32;
use qrcode::{Color, QrCode};
use rand::RngCore;
use totp_rs::{Algorithm, TOTP};
use tracing::info;

const ISSUER: &str = "tunnelkit";

pub fn command() -> Result<()> {
    let mut secret = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret);

    let totp = TOTP::new(
        Algorithm::SHA1,
        6,
        1,
        30,
        secret.to_vec(),
        Some(ISSUER.to_owned()),
        "tunnelkit".to_owned(),
    )
    .context("building TOTP enrollment URL")?;
    let url = totp.get_url();

    print_qr(&url)?;

    println!();
    info!(%url, "setup URL");
    info!("keyboard-interactive TOTP secret (base32, for manual entry):");
    println!("  {}", BASE32.encode(&secret));

    Ok(())
}

fn print_qr(data: &str) -> Result<()> {
    let code = QrCode::new(data.as_bytes()).context("rendering QR code")?;
    let width = code.width();
    let pixels = code.into_colors();

    for _ in 0..width + 4 {
        print!("{}", Style::new().on(White).paint(" "));
    }
    println!();

    for hy in 0..(pixels.len() + width - 1) / width / 2 + 1 {
        print!("{}", Style::new().on(White).paint("  "));
        for x in 0..width {
            let top = pixels
                .get(hy * 2 * width + x)
                .map(|c| *c == Color::Dark)
                .unwrap_or(false);
            let bottom = pixels
                .get((hy * 2 + 1) * width + x)
                .map(|c| *c == Color::Dark)
                .unwrap_or(false);

            print!(
                "{}",
                match (top, bottom) {
                    (true, true) => Style::new().fg(Black).paint("█"),
                    (true, false) => Style::new().fg(Black).on(White).paint("▀"),
                    (false, true) => Style::new().fg(Black).on(White).paint("▄"),
                    (false, false) => Style::new().on(White).paint(" "),
                }
            );
        }
        println!("{}", Style::new().on(White).paint("  "));
    }

    Ok(())
}
