//! `tally validate` command implementation

use super::load_job;
use crate::error::Result;
use std::path::Path;
use tally_engine::DescriptorRegistry;

pub fn run(job: &Path) -> Result<()> {
    let job = load_job(job)?;
    let registry = DescriptorRegistry::with_builtin();
    job.validate(&registry)?;

    let keys = job.all_component_keys();
    let single_node = job.non_distributable_components(&registry)?;

    println!(
        "Job '{}' is valid: {} component(s)",
        job.name.as_deref().unwrap_or("unnamed"),
        keys.len()
    );
    if single_node.is_empty() {
        println!("All components can run distributed.");
    } else {
        println!("Single node only:");
        for (key, descriptor) in &single_node {
            println!("  {} ({})", key, descriptor);
        }
    }
    Ok(())
}
