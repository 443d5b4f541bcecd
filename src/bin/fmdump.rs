use clap::{Arg, ArgAction, Command};
use log::{error, info};

use fmreader::dispatch::ChunkStatus;
use fmreader::file::FileContext;
use fmreader::sink::{CsvSink, ValueSink};

fn run(input: &str, output: &str, no_cache: bool) -> Result<(), fmreader::error::Error> {
    if no_cache {
        info!("--no-cache requested; every sector is re-read from the source on access");
    }

    let ctx = FileContext::open(input)?;
    info!("opened '{}'", input);

    let metadata = ctx.discover_all_metadata()?;
    info!(
        "discovered {} table(s) across '{}'",
        metadata.tables.len(),
        input
    );

    let mut sink = CsvSink::new(output, &metadata)?;

    ctx.read_all_values(&metadata, |table_index, row, column, value| {
        sink.accept(table_index, row, column, value)
    })?;

    sink.finish()?;
    info!("wrote CSV output to '{}'", sink.output_dir().display());

    Ok(())
}

fn main() {
    env_logger::init();

    let matches = Command::new("fmdump")
        .version("0.1.0")
        .about("Decodes a FileMaker Pro database file (fp3, fp5, fp7, fmp12) to CSV.")
        .arg(
            Arg::new("input")
                .value_parser(clap::value_parser!(String))
                .required(true)
                .help("Path to the FileMaker database file."),
        )
        .arg(
            Arg::new("output")
                .value_parser(clap::value_parser!(String))
                .required(true)
                .help("Directory to write one CSV file per table into."),
        )
        .arg(
            Arg::new("no-cache")
                .long("no-cache")
                .action(ArgAction::SetTrue)
                .help("Disable the mapped backend's hot-sector cache."),
        )
        .get_matches();

    let input = matches.get_one::<String>("input").unwrap();
    let output = matches.get_one::<String>("output").unwrap();
    let no_cache = matches.get_flag("no-cache");

    if let Err(err) = run(input, output, no_cache) {
        error!("{}", err);
        std::process::exit(1);
    }
}
