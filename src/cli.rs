use crate::Summary;
use anyhow::Context;
use clap::Parser;
use log::info;
use std::path::PathBuf;
use stepc_core::session::{LowerOptions, Session};

/// Lowers the methods of a compilation unit into step-machines
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path of the compilation unit JSON file
    #[arg(value_hint = clap::ValueHint::FilePath)]
    unit: PathBuf,
    /// Print a human-readable label for every block
    #[arg(long, default_value = "false")]
    labels: bool,
    /// Print the step-machines as JSON
    #[arg(long, default_value = "false")]
    json: bool,
}

impl Cli {
    pub fn run(&self) -> anyhow::Result<()> {
        let unit = stepc_json::load(&self.unit)?;
        let mut session = Session::new(LowerOptions {
            dump_labels: self.labels,
        });
        let result = stepc_core::compile_unit(&unit, &mut session);
        // Diagnostics are reported even when the lowering fails.
        for diagnostic in session.take_diagnostics() {
            eprintln!(
                "{}: {} ({})",
                diagnostic.severity,
                diagnostic.message,
                session.render(diagnostic.span)
            );
        }
        let compiled =
            result.with_context(|| format!("failed to lower unit '{}'", unit.name))?;
        info!("unit {} lowered", compiled.name);

        if self.json {
            let json = serde_json::to_string_pretty(&compiled.machines)
                .context("failed to serialize step-machines")?;
            println!("{json}");
        } else if self.labels {
            for (block, label) in session.labels() {
                println!("{block}\t{label}");
            }
        } else {
            println!("Lowered unit '{}'", compiled.name);
            for machine in &compiled.machines {
                println!("{}", Summary::from(machine));
            }
        }
        Ok(())
    }
}
