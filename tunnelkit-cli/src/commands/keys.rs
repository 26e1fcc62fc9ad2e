//! `tunnelkit keys`: load the configured private key and print its public half in
//! authorized-keys form so an operator can add it to a target's `authorized_keys` file.

use std::path::Path;

use anyhow::{Context, Result};

pub fn command(identity: &Path) -> Result<()> {
    let key = russh::keys::load_secret_key(identity, None)
        .with_context(|| format!("loading private key at {}", identity.display()))?;

    println!("tunnelkit client key:");
    println!("(add this to the target's authorized_keys file)");
    println!();
    println!(
        "{}",
        key.public_key()
            .to_openssh()
            .context("encoding public key in authorized-keys form")?
    );
    Ok(())
}
