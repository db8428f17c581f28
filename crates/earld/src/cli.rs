//! Command line of the daemon.
//!
//! Positional arguments are the serial devices, each optionally carrying
//! a baudrate: `/dev/ttyUSB0:9600`. Everything else is flags.

use std::path::PathBuf;

use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};

use earl_core::constants::DEFAULT_BAUDRATE;
use earl_core::{Error, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Serial devices to supervise: (path, baudrate).
    pub devices: Vec<(String, u32)>,
    pub users_file: PathBuf,
    pub logfile: Option<PathBuf>,
    pub bell_dir: PathBuf,
    pub tcp_port: Option<u16>,
    pub list_users: bool,
}

fn command() -> Command {
    Command::new("earld")
        .version(earl_core::VERSION)
        .about("Access control daemon for the hackerspace wall terminals")
        .arg(
            Arg::new("devices")
                .value_name("DEVICE[:BAUD]")
                .num_args(0..)
                .help("Serial devices with terminals attached"),
        )
        .arg(
            Arg::new("users")
                .long("users")
                .value_name("PATH")
                .default_value("/var/access/users.csv")
                .help("User authentication file"),
        )
        .arg(
            Arg::new("logfile")
                .long("logfile")
                .value_name("PATH")
                .help("Log file, default stdout"),
        )
        .arg(
            Arg::new("belldir")
                .long("belldir")
                .value_name("DIR")
                .default_value("/var/access/bell-sounds")
                .help("Directory with <target>.wav doorbell sounds"),
        )
        .arg(
            Arg::new("tcpport")
                .long("tcpport")
                .value_name("PORT")
                .value_parser(value_parser!(u16))
                .help("Serve the JSON event stream on this TCP port"),
        )
        .arg(
            Arg::new("list-users")
                .long("list-users")
                .action(ArgAction::SetTrue)
                .help("Print the user table and exit"),
        )
}

fn device_from_arg(arg: &str) -> Result<(String, u32)> {
    match arg.split_once(':') {
        None => Ok((arg.to_string(), DEFAULT_BAUDRATE)),
        Some((device, baud)) => {
            let baud: u32 = baud
                .parse()
                .map_err(|_| Error::InvalidDeviceArg(arg.to_string()))?;
            if device.is_empty() {
                return Err(Error::InvalidDeviceArg(arg.to_string()));
            }
            Ok((device.to_string(), baud))
        }
    }
}

fn config_from(matches: &ArgMatches) -> Result<Config> {
    let devices = match matches.get_many::<String>("devices") {
        Some(values) => values
            .map(|arg| device_from_arg(arg))
            .collect::<Result<Vec<_>>>()?,
        None => Vec::new(),
    };
    Ok(Config {
        devices,
        users_file: matches
            .get_one::<String>("users")
            .map(PathBuf::from)
            .unwrap_or_default(),
        logfile: matches.get_one::<String>("logfile").map(PathBuf::from),
        bell_dir: matches
            .get_one::<String>("belldir")
            .map(PathBuf::from)
            .unwrap_or_default(),
        tcp_port: matches.get_one::<u16>("tcpport").copied(),
        list_users: matches.get_flag("list-users"),
    })
}

/// Parse the process arguments. Exits with usage on flag errors.
pub fn parse() -> Result<Config> {
    config_from(&command().get_matches())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_args(args: &[&str]) -> Result<Config> {
        let matches = command()
            .try_get_matches_from(args)
            .expect("clap should accept these");
        config_from(&matches)
    }

    #[test]
    fn devices_with_and_without_baud() {
        let config =
            parse_args(&["earld", "/dev/ttyUSB0", "/dev/ttyAMA0:19200"]).unwrap();
        assert_eq!(
            config.devices,
            vec![
                ("/dev/ttyUSB0".to_string(), 9600),
                ("/dev/ttyAMA0".to_string(), 19200),
            ]
        );
    }

    #[test]
    fn bad_baudrate_is_rejected() {
        assert!(parse_args(&["earld", "/dev/ttyUSB0:fast"]).is_err());
        assert!(parse_args(&["earld", ":9600"]).is_err());
    }

    #[test]
    fn defaults() {
        let config = parse_args(&["earld"]).unwrap();
        assert_eq!(config.users_file, PathBuf::from("/var/access/users.csv"));
        assert_eq!(config.bell_dir, PathBuf::from("/var/access/bell-sounds"));
        assert!(config.logfile.is_none());
        assert!(config.tcp_port.is_none());
        assert!(!config.list_users);
        assert!(config.devices.is_empty());
    }

    #[test]
    fn flags() {
        let config = parse_args(&[
            "earld",
            "--users",
            "/tmp/u.csv",
            "--logfile",
            "/tmp/earl.log",
            "--belldir",
            "/tmp/bells",
            "--tcpport",
            "4243",
            "--list-users",
            "/dev/ttyUSB0",
        ])
        .unwrap();
        assert_eq!(config.users_file, PathBuf::from("/tmp/u.csv"));
        assert_eq!(config.logfile, Some(PathBuf::from("/tmp/earl.log")));
        assert_eq!(config.bell_dir, PathBuf::from("/tmp/bells"));
        assert_eq!(config.tcp_port, Some(4243));
        assert!(config.list_users);
        assert_eq!(config.devices.len(), 1);
    }
}
