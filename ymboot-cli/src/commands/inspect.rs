//! Firmware image inspection.

use {
    anyhow::{Context, Result},
    console::style,
    serde::Serialize,
    std::{fs, path::Path},
    ymboot::{PlatformConfig, RamFlash, VectorTable},
};

/// What the bootloader would make of an image.
#[derive(Debug, Serialize)]
pub(crate) struct ImageReport {
    pub size: u64,
    pub capacity: u64,
    pub fits: bool,
    pub firmware_address: u32,
    pub vector_address: u32,
    pub vectors: Option<VectorTable>,
    pub problem: Option<String>,
}

impl ImageReport {
    /// Whether the image would be received and launched.
    pub fn bootable(&self) -> bool {
        self.fits && self.problem.is_none()
    }
}

/// Place `image` at the firmware address and check its vector table.
pub(crate) fn inspect_image(image: Vec<u8>, platform: &PlatformConfig) -> ImageReport {
    let size = image.len() as u64;
    let flash = RamFlash::with_contents(platform.firmware_address(), image);

    let (vectors, problem) = match VectorTable::read_from(&flash, platform) {
        Ok(vectors) => (Some(vectors), vectors.validate().err().map(|e| e.to_string())),
        Err(e) => (None, Some(e.to_string())),
    };

    ImageReport {
        size,
        capacity: platform.flash_size,
        fits: size <= platform.flash_size,
        firmware_address: platform.firmware_address(),
        vector_address: platform.vector_address(),
        vectors,
        problem,
    }
}

/// Inspect command implementation.
pub(crate) fn cmd_inspect(platform: &PlatformConfig, path: &Path, json: bool) -> Result<()> {
    let image =
        fs::read(path).with_context(|| format!("Failed to read image {}", path.display()))?;
    let report = inspect_image(image, platform);

    if json {
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "file": path.display().to_string(),
                "bootable": report.bootable(),
                "image": report,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("{}", style(path.display()).bold().underlined());
    println!(
        "  Size:            {} bytes (capacity {})",
        report.size, report.capacity
    );
    println!("  Load address:    0x{:08X}", report.firmware_address);
    println!("  Vector table:    0x{:08X}", report.vector_address);
    if let Some(vectors) = report.vectors {
        println!("  Initial SP:      0x{:08X}", vectors.initial_sp);
        println!("  Reset vector:    0x{:08X}", vectors.reset_vector);
    }
    if !report.fits {
        println!("  {}", style("Image exceeds flash capacity").red());
    }
    match &report.problem {
        Some(problem) => println!("  {} {problem}", style("Not bootable:").red()),
        None if report.fits => println!("  {}", style("Bootable").green()),
        None => {},
    }

    Ok(())
}
