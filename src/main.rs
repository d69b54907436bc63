// src/main.rs
use doc_topics::{ConverterConfig, DocumentProcessor};
use std::path::PathBuf;

fn main() -> anyhow::Result<()> {
    let _ = env_logger::try_init();

    let mut args = std::env::args().skip(1);
    let input = PathBuf::from(args.next().unwrap_or_else(|| "tests/sample.docx".to_string()));
    let config = match args.next() {
        Some(path) => ConverterConfig::from_json_str(&std::fs::read_to_string(path)?)?,
        None => ConverterConfig::default(),
    };

    let processor = DocumentProcessor::new(config);
    let outputs = if input.is_dir() {
        processor.convert_directory(&input)?
    } else {
        vec![processor.convert_path(&input)?]
    };

    for output in &outputs {
        println!("{}", serde_json::to_string_pretty(&output.summary())?);
    }
    println!("✅ {} document(s) converted", outputs.len());
    Ok(())
}
