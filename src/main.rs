use std::sync::Mutex;

use clap::{Arg, ArgAction, Command, value_parser};
use clap_num::maybe_hex;
use exhume_body::{Body, BodySlice};
use log::{debug, error, warn};
use ntfs_layout::{Ntfs, ReadAt};
use prettytable::{Table, row};
use serde_json::json;

fn main() {
    let matches = Command::new("ntfs_layout")
        .version("0.1.0")
        .author("ForensicXlab")
        .about("Decode the on-disk metadata of an NTFS volume.")
        .arg(
            Arg::new("body")
                .short('b')
                .long("body")
                .value_parser(value_parser!(String))
                .required(true)
                .help("The path to the body to decode."),
        )
        .arg(
            Arg::new("format")
                .short('f')
                .long("format")
                .value_parser(value_parser!(String))
                .required(false)
                .help("The format of the file, either 'raw' or 'ewf'."),
        )
        .arg(
            Arg::new("offset")
                .short('o')
                .long("offset")
                .value_parser(maybe_hex::<u64>)
                .required(true)
                .help("The NTFS partition starts at address (decimal or hex)."),
        )
        .arg(
            Arg::new("size")
                .short('s')
                .long("size")
                .value_parser(maybe_hex::<u64>)
                .required(true)
                .help("The size of the NTFS partition in sectors (decimal or hex)."),
        )
        .arg(
            Arg::new("pbs")
                .long("pbs")
                .action(ArgAction::SetTrue)
                .help("Display the boot record and its parameter block."),
        )
        .arg(
            Arg::new("volume")
                .long("volume")
                .action(ArgAction::SetTrue)
                .help("Display the volume label, NTFS version and volume flags."),
        )
        .arg(
            Arg::new("file_id")
                .long("file")
                .value_parser(maybe_hex::<u64>)
                .help("Display the attributes of a specific MFT record."),
        )
        .arg(
            Arg::new("runs")
                .long("runs")
                .requires("file_id")
                .action(ArgAction::SetTrue)
                .help("If --file is specified, list the data runs of its non-resident attributes."),
        )
        .arg(
            Arg::new("mft_extents")
                .long("mft-extents")
                .action(ArgAction::SetTrue)
                .help("Map the $MFT extents before addressing records and display them."),
        )
        .arg(
            Arg::new("json")
                .short('j')
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Output the boot record and file records in JSON format."),
        )
        .arg(
            Arg::new("log_level")
                .short('l')
                .long("log-level")
                .value_parser(["error", "warn", "info", "debug", "trace"])
                .default_value("info")
                .help("Set the log verbosity level"),
        )
        .get_matches();

    // Initialize logger.
    let level_filter = match matches.get_one::<String>("log_level").map(String::as_str) {
        Some("error") => log::LevelFilter::Error,
        Some("warn") => log::LevelFilter::Warn,
        Some("debug") => log::LevelFilter::Debug,
        Some("trace") => log::LevelFilter::Trace,
        _ => log::LevelFilter::Info,
    };
    env_logger::Builder::new().filter_level(level_filter).init();

    let Some(file_path) = matches.get_one::<String>("body") else {
        error!("No body given.");
        return;
    };
    let auto = String::from("auto");
    let format = matches.get_one::<String>("format").unwrap_or(&auto);
    let offset = matches.get_one::<u64>("offset").copied().unwrap_or(0);
    let size = matches.get_one::<u64>("size").copied().unwrap_or(0);
    let show_pbs = matches.get_flag("pbs");
    let show_volume = matches.get_flag("volume");
    let show_runs = matches.get_flag("runs");
    let map_extents = matches.get_flag("mft_extents");
    let json_output = matches.get_flag("json");
    let file_id = matches.get_one::<u64>("file_id").copied();

    let mut body = Body::new(file_path.to_owned(), format);
    debug!("Created Body from '{}'", file_path);

    let partition_size = size * body.get_sector_size() as u64;
    let slice = match BodySlice::new(&mut body, offset, partition_size) {
        Ok(sl) => sl,
        Err(e) => {
            error!("Could not create BodySlice: {}", e);
            return;
        }
    };

    let mut volume = match Ntfs::new(Mutex::new(slice)) {
        Ok(v) => v,
        Err(e) => {
            error!("Couldn't open NTFS: {}", e);
            return;
        }
    };

    if show_pbs {
        let boot = volume.boot_record();
        if json_output {
            match serde_json::to_string_pretty(&boot.to_json()) {
                Ok(s) => println!("{}", s),
                Err(e) => error!("Error serializing boot record to JSON: {}", e),
            }
        } else {
            println!("{}", boot.to_string());
        }
    }

    if map_extents {
        match volume.map_mft_extents() {
            Ok(mft) => print_extents(mft, json_output),
            Err(e) => warn!("Could not map $MFT extents, using linear addressing: {}", e),
        }
    }

    if show_volume {
        print_volume(&volume, json_output);
    }

    if let Some(id) = file_id {
        let (file, damage) = match volume.scan_file(id) {
            Ok(scanned) => scanned,
            Err(e) => {
                error!("Could not read MFT entry {}: {}", id, e);
                return;
            }
        };
        if let Some(e) = &damage {
            warn!("MFT entry {} is damaged, showing partial attributes: {}", id, e);
        }

        if json_output {
            let mut v = file.to_json();
            if let (Some(e), Some(obj)) = (&damage, v.as_object_mut()) {
                obj.insert("error".into(), json!(e.to_string()));
            }
            match serde_json::to_string_pretty(&v) {
                Ok(s) => println!("{}", s),
                Err(e) => error!("Error serializing MFT entry to JSON: {}", e),
            }
        } else if show_runs {
            let mut t = Table::new();
            t.add_row(row!["Attribute", "Name", "Length (clusters)", "LCN"]);
            for attr in file.attributes.iter().filter(|a| !a.is_resident()) {
                match attr.data_runs() {
                    Ok(runs) => {
                        for run in runs {
                            t.add_row(row![
                                attr.attr_type(),
                                attr.name().unwrap_or("N/A"),
                                run.length,
                                run.offset.map_or("sparse".to_string(), |o| o.to_string())
                            ]);
                        }
                    }
                    Err(e) => error!("Bad data runs in {}: {}", attr.attr_type(), e),
                }
            }
            println!("{}", t);
        } else {
            println!("{}", file.to_string());
        }
    }
}

fn print_extents(mft: &ntfs_layout::Mft, json_output: bool) {
    let extents = mft.extents.as_deref().unwrap_or_default();
    if json_output {
        println!("{}", json!({ "mft_extents": extents, "records": mft.record_count() }));
        return;
    }
    let mut t = Table::new();
    t.add_row(row!["VCN", "LCN", "Clusters"]);
    for e in extents {
        t.add_row(row![e.vcn, e.lcn, e.clusters]);
    }
    println!("{}", t);
    if let Some(count) = mft.record_count() {
        println!("{} MFT records", count);
    }
}

fn print_volume<S: ReadAt>(volume: &Ntfs<S>, json_output: bool) {
    let name = volume.volume_name().unwrap_or_else(|e| {
        error!("Could not read the volume label: {}", e);
        None
    });
    let info = volume.volume_information().unwrap_or_else(|e| {
        error!("Could not read the volume information: {}", e);
        None
    });
    if json_output {
        println!("{}", json!({ "volume_name": name, "volume_information": info }));
        return;
    }
    let mut t = Table::new();
    t.add_row(row!["Volume"]);
    t.add_row(row![b -> "Label", name.unwrap_or_default()]);
    if let Some(info) = info {
        t.add_row(row![b -> "Version", format!("{}.{}", info.major_version, info.minor_version)]);
        t.add_row(row![b -> "Flags", info.flags]);
    }
    println!("{}", t);
}
