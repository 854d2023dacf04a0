use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::LevelFilter;
use mslice_common::{
    defocus_steps, dose_steps, read_toml, TomlParameters, DEFOCUS_RANGE, DOSE_LOG10_RANGE,
};
use mslice_simulator::simulation_object::{load_volume, parameters_from_toml, SimulationObject};
use std::time::Instant;
use std::{error::Error, str::FromStr};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CommandLineArguments {
    /// path to toml describing the simulation
    #[arg(short, long, required_unless_present = "list_steps")]
    toml: Option<String>,

    /// log level (off, error, warn, info, debug, trace)
    #[arg(short, long)]
    verbosity: Option<String>,

    /// defocus in µm, overriding the toml (and any defocus series)
    #[arg(long, allow_hyphen_values = true)]
    defocus: Option<f64>,

    /// dose in e/Å^2, overriding the toml
    #[arg(long)]
    dose: Option<f64>,

    /// also form Zernike phase-plate images
    #[arg(long)]
    zernike: bool,

    /// print the resolved parameters and exit
    #[arg(long)]
    test: bool,

    /// print the interactive control steps for defocus and dose and exit
    #[arg(long)]
    list_steps: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = CommandLineArguments::parse();

    env_logger::builder()
        .format_timestamp_secs()
        .filter_level(LevelFilter::from_str(
            args.verbosity.as_deref().unwrap_or("info"),
        )?)
        .init();

    if args.list_steps {
        println!("defocus (µm): {:?}", defocus_steps());
        println!("dose (e/Å^2): {:?}", dose_steps());
        return Ok(());
    }

    // Start timer
    let now = Instant::now();

    // Parse toml and apply command line overrides
    let toml_path = args.toml.as_deref().unwrap_or_default();
    let mut toml: TomlParameters = read_toml(toml_path)?;
    if let Some(defocus) = args.defocus {
        toml.defocus = defocus;
        toml.defocus_series = None;
    }
    if let Some(dose) = args.dose {
        toml.dose = dose;
    }
    toml.zernike |= args.zernike;
    toml.validate()?;
    warn_outside_controls(&toml);

    let streams = parameters_from_toml::<f64>(&toml);
    if args.test {
        for parameters in &streams {
            println!("{parameters}");
        }
        return Ok(());
    }

    // Every stream shares one source, so the volume is read once
    let Some(first) = streams.first() else {
        return Ok(());
    };
    let volume = load_volume(first)?;
    log::info!(
        "loaded potential of shape {:?} after {} millis",
        volume.dim(),
        now.elapsed().as_millis()
    );

    let pb = ProgressBar::new(streams.len() as u64);
    pb.set_style(ProgressStyle::with_template(
        "[{elapsed_precise}] {bar:40} {pos}/{len} {msg}",
    )?);
    for parameters in streams {
        log::debug!("Simulation Parameters\n{parameters}");
        pb.set_message(parameters.sim_name.clone());

        let simulation = SimulationObject::new(volume.clone(), parameters);
        let output = simulation.run()?;
        simulation.dump(&output)?;
        pb.inc(1);
    }
    pb.finish_with_message("done");

    println!("Finished in {} millis", now.elapsed().as_millis());
    Ok(())
}

/// The interactive controls only cover a fixed range. Values outside it still run.
fn warn_outside_controls(toml: &TomlParameters) {
    let (low, high) = DEFOCUS_RANGE;
    for defocus in toml.defocus_values() {
        if !(low..=high).contains(&defocus) {
            log::warn!("defocus {defocus} µm lies outside the control range [{low}, {high}]");
        }
    }
    let (low, high) = (
        10f64.powf(DOSE_LOG10_RANGE.0),
        10f64.powf(DOSE_LOG10_RANGE.1),
    );
    if !(low..=high).contains(&toml.dose) {
        log::warn!(
            "dose {} e/Å^2 lies outside the control range [{low}, {high}]",
            toml.dose
        );
    }
}
