// Prepack
// Copyright (c) 2026 The Prepack Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::exit;

use clap::{Arg, Command};
use log::{error, info};

use prepack::core::errors::Result;
use prepack::core::io::ProgressWriter;
use prepack::core::options::Options;

fn main() {
    pretty_env_logger::init();

    let matches = Command::new("Prepack")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Losslessly expand embedded compressed streams so the result compresses better")
        .arg(
            Arg::new("restore")
                .long("restore")
                .short('r')
                .help("Restore the original file from a precompressed stream"),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .short('o')
                .takes_value(true)
                .value_name("FILE")
                .help("Output file name"),
        )
        .arg(
            Arg::new("intense")
                .long("intense")
                .help("Also detect bare zlib streams without a container"),
        )
        .arg(
            Arg::new("intense-depth")
                .long("intense-depth")
                .takes_value(true)
                .value_name("DEPTH")
                .requires("intense")
                .help("Recursion depth limit for intense mode"),
        )
        .arg(
            Arg::new("brute")
                .long("brute")
                .help("Also detect headerless deflate streams (slow)"),
        )
        .arg(
            Arg::new("brute-depth")
                .long("brute-depth")
                .takes_value(true)
                .value_name("DEPTH")
                .requires("brute")
                .help("Recursion depth limit for brute mode"),
        )
        .arg(
            Arg::new("disable")
                .long("disable")
                .short('d')
                .takes_value(true)
                .multiple_occurrences(true)
                .value_name("FORMAT")
                .possible_values([
                    "pdf", "zip", "gzip", "png", "gif", "jpeg", "mp3", "swf", "base64", "bzip2",
                ])
                .help("Disable a format (may be given multiple times)"),
        )
        .arg(
            Arg::new("no-verify")
                .long("no-verify")
                .help("Skip the bit-exact round-trip proof of every claimed stream"),
        )
        .arg(
            Arg::new("recursion-depth")
                .long("recursion-depth")
                .takes_value(true)
                .value_name("DEPTH")
                .help("Maximum recursion depth when re-scanning expanded payloads [default: 10]"),
        )
        .arg(
            Arg::new("progonly")
                .long("progonly")
                .help("JPEG: only precompress progressive streams"),
        )
        .arg(Arg::new("pdf-bmp").long("pdf-bmp").help("PDF: wrap image streams in a BMP header"))
        .arg(
            Arg::new("no-mjpeg")
                .long("no-mjpeg")
                .help("JPEG: do not splice Huffman tables into Motion-JPEG frames"),
        )
        .arg(Arg::new("INPUT").required(true).help("The input file"))
        .get_matches();

    let input = PathBuf::from(matches.value_of("INPUT").unwrap());

    let mut options = Options::default();
    options.verify_precompressed = !matches.is_present("no-verify");
    options.intense_mode = matches.is_present("intense");
    options.brute_mode = matches.is_present("brute");
    options.prog_only = matches.is_present("progonly");
    options.pdf_bmp_mode = matches.is_present("pdf-bmp");
    options.use_mjpeg = !matches.is_present("no-mjpeg");

    if let Some(depth) = parse_depth(matches.value_of("recursion-depth")) {
        options.max_recursion_depth = depth;
    }
    options.intense_depth_limit = parse_depth(matches.value_of("intense-depth"));
    options.brute_depth_limit = parse_depth(matches.value_of("brute-depth"));

    if let Some(disabled) = matches.values_of("disable") {
        for format in disabled {
            match format {
                "pdf" => options.formats.pdf = false,
                "zip" => options.formats.zip = false,
                "gzip" => options.formats.gzip = false,
                "png" => options.formats.png = false,
                "gif" => options.formats.gif = false,
                "jpeg" => options.formats.jpeg = false,
                "mp3" => options.formats.mp3 = false,
                "swf" => options.formats.swf = false,
                "base64" => options.formats.base64 = false,
                "bzip2" => options.formats.bzip2 = false,
                _ => unreachable!(),
            }
        }
    }

    let result = if matches.is_present("restore") {
        run_restore(&options, &input, matches.value_of("output"))
    }
    else {
        run_precompress(&options, &input, matches.value_of("output"))
    };

    if let Err(err) = result {
        error!("{}", err);
        eprintln!("error: {}", err);
        exit(1);
    }
}

fn parse_depth(value: Option<&str>) -> Option<u32> {
    value.and_then(|depth| depth.parse().ok())
}

fn run_precompress(options: &Options, input: &Path, output: Option<&str>) -> Result<()> {
    let source = File::open(input)?;
    let input_len = source.metadata().map(|meta| meta.len()).unwrap_or(0);

    let out_path = match output {
        Some(path) => PathBuf::from(path),
        None => {
            let mut path = input.as_os_str().to_owned();
            path.push(".pcf");
            PathBuf::from(path)
        }
    };

    let mut last_percent = u64::MAX;
    let mut out = ProgressWriter::new(BufWriter::new(File::create(&out_path)?), |written| {
        if input_len > 0 {
            // Written bytes track input position closely enough for a coarse indicator.
            let percent = (written * 100 / input_len).min(100);
            if percent != last_percent && percent % 10 == 0 {
                info!("{}%", percent);
                last_percent = percent;
            }
        }
    });

    let input_name =
        input.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default();

    let stats = prepack::precompress(options, Box::new(source), &mut out, &input_name)?;
    out.into_inner().flush()?;

    print!("{}", stats);
    println!("written to {}", out_path.display());

    Ok(())
}

fn run_restore(options: &Options, input: &Path, output: Option<&str>) -> Result<()> {
    let mut source = File::open(input)?;

    // Prefer an explicit output name, then the name recorded in the stream, then the input name
    // without its extension.
    let fallback = || {
        let mut path = input.to_path_buf();
        if path.extension().is_some_and(|ext| ext == "pcf") {
            path.set_extension("");
            path
        }
        else {
            let mut name = path.as_os_str().to_owned();
            name.push(".out");
            PathBuf::from(name)
        }
    };

    match output {
        Some(path) => {
            let mut out = BufWriter::new(File::create(path)?);
            prepack::restore(options, &mut source, &mut out)?;
            out.flush()?;
            println!("restored to {}", path);
        }
        None => {
            // The recorded name is only known after reading the header, so restore into memory
            // is not an option for large files; restore to the fallback name and rename after.
            let out_path = fallback();
            let mut out = BufWriter::new(File::create(&out_path)?);
            let header = prepack::restore(options, &mut source, &mut out)?;
            out.flush()?;

            let final_path = if header.input_file_name.is_empty() {
                out_path
            }
            else {
                let named = input.with_file_name(&header.input_file_name);
                if named.exists() {
                    out_path
                }
                else {
                    std::fs::rename(&out_path, &named)?;
                    named
                }
            };
            println!("restored to {}", final_path.display());
        }
    }

    Ok(())
}
