// src/commands/info.rs
//! Package file inspection

use anyhow::{Context, Result};
use ferry::archive::Package;
use ferry::hash;
use std::path::Path;

/// Print the metadata of a package archive
pub fn cmd_info(path: &Path, show_files: bool) -> Result<()> {
    let mut package =
        Package::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let metadata = package.read_metadata()?;

    println!("Name            : {}", metadata.name);
    println!("Source          : {}", metadata.source_name);
    println!(
        "Version         : {}, release: {}",
        metadata.version(),
        metadata.release()
    );
    println!("Summary         : {}", metadata.summary);
    println!("Description     : {}", metadata.description);
    println!("Licenses        : {}", metadata.licenses.join(", "));
    if let Some(component) = &metadata.component {
        println!("Component       : {}", component);
    }
    if let Some(distribution) = &metadata.distribution {
        match &metadata.distribution_release {
            Some(release) => println!("Distribution    : {} {}", distribution, release),
            None => println!("Distribution    : {}", distribution),
        }
    }
    if !metadata.runtime_dependencies.is_empty() {
        println!(
            "Dependencies    : {}",
            metadata.runtime_dependencies.join(" ")
        );
    }
    println!("SHA-256         : {}", hash::sha256_file(path)?);

    if show_files {
        let files = package.read_files()?;
        println!("Files ({}):", files.len());
        for file in files {
            println!("  /{}", file.path.trim_start_matches('/'));
        }
    }
    Ok(())
}
