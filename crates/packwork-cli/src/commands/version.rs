use miette::Result;
use packwork_core::VERSION;

pub fn run() -> Result<()> {
    println!("packwork {VERSION}");
    Ok(())
}
