//! `cfs`: thin command-line shell over the container-fs core.
//!
//! All filesystem logic lives in the core crate; this binary only parses
//! arguments, pipes bytes between stdin/stdout and the container, and
//! installs the log sink.

use std::error::Error;
use std::io::{Read, Write};
use std::path::Path;

use clap::{Arg, ArgAction, Command};
use container_fs::Container;

fn main() {
  if let Err(err) = run() {
    eprintln!("cfs: {err}");
    std::process::exit(1);
  }
}

fn run() -> Result<(), Box<dyn Error>> {
  let matches = Command::new("cfs")
    .about("single-file container file system")
    .arg(Arg::new("container").required(true).help("container file on the host"))
    .arg(
      Arg::new("command")
        .required(true)
        .value_parser(["create", "stats", "read", "write", "delete", "dir", "mkdir", "rmdir"]),
    )
    .arg(Arg::new("file").long("file").help("file name inside the container"))
    .arg(
      Arg::new("path")
        .long("path")
        .default_value("/")
        .help("directory path inside the container"),
    )
    .arg(
      Arg::new("params")
        .long("params")
        .default_value("4096,4096")
        .help("block size and block count for create, e.g. 4096,8192"),
    )
    .arg(Arg::new("debug").long("debug").action(ArgAction::SetTrue).help("verbose logging"))
    .get_matches();

  let debug = matches.get_flag("debug");
  env_logger::Builder::from_default_env()
    .filter_level(if debug { log::LevelFilter::Debug } else { log::LevelFilter::Warn })
    .init();

  let container = matches.get_one::<String>("container").unwrap();
  let command = matches.get_one::<String>("command").unwrap();
  let path = matches.get_one::<String>("path").unwrap();
  let file_arg = matches.get_one::<String>("file");
  let file = || file_arg.ok_or(format!("`{command}` needs --file"));

  match command.as_str() {
    "create" => {
      let (block_size, block_count) = parse_params(matches.get_one::<String>("params").unwrap())?;
      let name = Path::new(container)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(container);
      Container::create(container, name, block_size, block_count, debug)?;
      println!("created `{container}`: {block_count} blocks of {block_size} bytes");
    }
    "stats" => {
      let fs = Container::open(container, debug)?;
      let stats = fs.stats();
      println!("container:    {}", stats.name);
      println!("version:      {}", stats.version);
      println!("created:      {}", stats.created);
      println!("block size:   {}", stats.block_size);
      println!("block count:  {}", stats.block_count);
      println!("free blocks:  {}", stats.free_blocks);
      println!("total bytes:  {}", stats.total_bytes);
      println!("free bytes:   {}", stats.free_bytes);
    }
    "read" => {
      let fs = Container::open(container, debug)?;
      let data = fs.read_file(path, file()?)?;
      std::io::stdout().write_all(&data)?;
    }
    "write" => {
      let mut fs = Container::open(container, debug)?;
      let mut data = Vec::new();
      std::io::stdin().read_to_end(&mut data)?;
      fs.write_file(path, file()?, &data)?;
      println!("wrote {} bytes to {path}/{}", data.len(), file()?);
    }
    "delete" => {
      let mut fs = Container::open(container, debug)?;
      fs.delete_file(path, file()?)?;
      println!("deleted {path}/{}", file()?);
    }
    "dir" => {
      let fs = Container::open(container, debug)?;
      let listing = fs.read_directory(path)?;
      println!("{path} (block offset {}):", listing.position);
      for name in &listing.directories {
        println!("  <dir>        {name}");
      }
      for (name, size) in &listing.files {
        println!("  {size:>10}   {name}");
      }
    }
    "mkdir" => {
      let mut fs = Container::open(container, debug)?;
      fs.write_directory(path)?;
      println!("created directory {path}");
    }
    "rmdir" => {
      let mut fs = Container::open(container, debug)?;
      fs.delete_directory(path)?;
      println!("deleted directory {path}");
    }
    other => return Err(format!("unknown command `{other}`").into()),
  }
  Ok(())
}

/// `--params=block_size,block_count`
fn parse_params(params: &str) -> Result<(u32, u32), Box<dyn Error>> {
  let Some((size, count)) = params.split_once(',') else {
    return Err(format!("bad --params `{params}`, expected `block_size,block_count`").into());
  };
  Ok((size.trim().parse()?, count.trim().parse()?))
}
