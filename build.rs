fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo::rerun-if-env-changed=RP2040_CUSTOM_BIN");

    let out_dir = std::path::PathBuf::from(std::env::var("OUT_DIR")?);

    let embedded = match std::env::var("RP2040_CUSTOM_BIN") {
        Ok(path) => {
            let path = std::fs::canonicalize(&path)
                .map_err(|error| format!("Unable to find custom firmware [{path}]: {error}"))?;
            println!("cargo::rerun-if-changed={}", path.display());
            format!("Some(include_bytes!({:?}) as &[u8])", path.display().to_string())
        }
        Err(_) => "None".to_string(),
    };

    std::fs::write(
        out_dir.join("custom_firmware.rs"),
        format!("const EMBEDDED_FIRMWARE: Option<&[u8]> = {embedded};\n"),
    )?;

    Ok(())
}
