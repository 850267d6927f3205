/*
 * Copyright 2025 Luc Lenôtre
 *
 * This file is part of Maestro.
 *
 * Maestro is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * Maestro is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * Maestro. If not, see <https://www.gnu.org/licenses/>.
 */

//! The `sfs` tool drives a filesystem image from the command line: it
//! formats a fresh image or remounts an existing one, runs a small write and
//! read-back scenario, then lists the files on the volume.

use sfs::SfsFactory;
use sfs::SimpleFileSystem;
use sfs::mksfs;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::process::exit;

/// The default path of the filesystem image.
const DEFAULT_IMAGE: &str = "sfs_disk.img";
/// The name of the file driven by the scenario.
const TEST_FILE: &str = "some_name.txt";

/// Structure storing command line arguments.
#[derive(Default)]
struct Args {
    /// If true, print command line help.
    help: bool,
    /// `true` to format a fresh image, `false` to remount the existing one.
    fresh: Option<bool>,
    /// The path to the image file.
    image: Option<PathBuf>,
}

fn parse_args() -> Args {
    let mut args: Args = Default::default();
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "-h" | "--help" => args.help = true,
            "0" if args.fresh.is_none() => args.fresh = Some(false),
            "1" if args.fresh.is_none() => args.fresh = Some(true),
            _ => args.image = Some(PathBuf::from(arg)),
        }
    }
    args
}

/// Writes an error to stderr, then exits.
fn error<M: fmt::Display>(msg: M) -> ! {
    eprintln!("sfs: error: {msg}");
    exit(1);
}

fn main() {
    let args = parse_args();
    if args.help {
        println!("usage: sfs <0|1> [image]");
        println!();
        println!("Pass 1 to format a fresh filesystem image, 0 to remount an existing one.");
        println!("The image defaults to `{DEFAULT_IMAGE}`.");
        return;
    }
    let Some(fresh) = args.fresh else {
        error("enter 0 to remount an existing filesystem or 1 to format a new one");
    };
    let image = args.image.unwrap_or_else(|| PathBuf::from(DEFAULT_IMAGE));

    if fresh && SfsFactory::default().is_present(&image).unwrap_or(false) {
        println!(
            "{} already contains a filesystem, overwriting",
            image.display()
        );
    }
    let mut fs = mksfs(&image, fresh).unwrap_or_else(|e| {
        error(format_args!("{}: {e}", image.display()));
    });

    if fresh {
        let fd = fs.fopen(TEST_FILE).unwrap_or_else(|e| error(e));
        fs.fwrite(fd, b"Lazy dog.\0").unwrap_or_else(|e| error(e));
        fs.fseek(fd, 0).unwrap_or_else(|e| error(e));
        print_content(&mut fs, fd);
        fs.fclose(fd);
    } else {
        let fd = fs.fopen(TEST_FILE).unwrap_or_else(|e| error(e));
        fs.fseek(fd, 0).unwrap_or_else(|e| error(e));
        print_content(&mut fs, fd);
        fs.fclose(fd);
    }

    println!("files on the volume:");
    while let Some(name) = fs.fgetnextfilename() {
        let size = fs.fgetfilesize(&name).unwrap_or_else(|e| error(e));
        println!("  {name} ({size} bytes)");
    }
}

/// Reads the content at the descriptor's current position and prints it.
fn print_content(fs: &mut SimpleFileSystem, fd: usize) {
    let mut buf = vec![0; 1024];
    let len = fs.fread(fd, &mut buf).unwrap_or_else(|e| error(e));
    let text = String::from_utf8_lossy(&buf[..len]);
    println!("{}", text.trim_end_matches('\0'));
}
