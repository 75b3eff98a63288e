use clap::{Arg, ArgAction, ArgMatches, ColorChoice, Command, value_parser};

use std::{path::PathBuf, str::FromStr, time::Duration};

use crate::{
    assistance::AssistanceKind,
    settings::{AssistanceSettings, ControlSettings, PipelineSettings, ProducerSettings, Refresh},
};

/// Parses a duration description, like "10 s" or "1 min"
fn duration(s: &str) -> Result<Duration, String> {
    let dt = hifitime::prelude::Duration::from_str(s.trim()).map_err(|e| e.to_string())?;

    if dt.is_negative() {
        return Err(format!("negative duration: {}", s));
    }

    Ok(Duration::from_nanos(dt.total_nanoseconds() as u64))
}

/// Parses a polling or refresh period: a non zero duration
fn period(s: &str) -> Result<Duration, String> {
    let dt = duration(s)?;

    if dt.is_zero() {
        return Err("period must be non-zero".to_string());
    }

    Ok(dt)
}

fn kind(s: &str) -> Result<AssistanceKind, String> {
    AssistanceKind::from_str(s).map_err(|e| e.to_string())
}

pub struct Cli {
    /// Arguments passed by user
    matches: ArgMatches,
}

impl Cli {
    /// Build new command line interface
    pub fn new() -> Self {
        Self::from_matches(Self::command().get_matches())
    }

    fn from_matches(matches: ArgMatches) -> Self {
        Self { matches }
    }

    fn command() -> Command {
        Command::new("gnss-control")
            .author("Guillaume W. Bres, <guillaume.bressaix@gmail.com>")
            .version(env!("CARGO_PKG_VERSION"))
            .about("GNSS receiver control plane")
            .color(ColorChoice::Always)
            .next_help_heading("Assistance")
            .arg(
                Arg::new("server")
                    .short('s')
                    .long("server")
                    .value_name("HOST:PORT")
                    .help("Assistance server. Without it, we only use the local cache (degraded mode)."),
            )
            .arg(
                Arg::new("cache")
                    .short('d')
                    .long("cache-dir")
                    .value_name("DIRECTORY")
                    .value_parser(value_parser!(PathBuf))
                    .help("Assistance cache directory. Default is current directory."),
            )
            .arg(
                Arg::new("gzip")
                    .long("gzip")
                    .action(ArgAction::SetTrue)
                    .help("Gzip compress the assistance cache."),
            )
            .arg(
                Arg::new("kinds")
                    .short('k')
                    .long("kinds")
                    .value_name("KIND")
                    .value_delimiter(',')
                    .value_parser(kind)
                    .help(
                        "Assistance kinds to request (eph,iono,utc,time,location). Default is all.",
                    ),
            )
            .arg(
                Arg::new("timeout")
                    .short('t')
                    .long("timeout")
                    .value_name("DURATION")
                    .value_parser(duration)
                    .help("Startup assistance deadline. Default is 10 s."),
            )
            .arg(
                Arg::new("request-timeout")
                    .long("request-timeout")
                    .value_name("DURATION")
                    .value_parser(duration)
                    .help("Single assistance request timeout. Default is 5 s."),
            )
            .arg(
                Arg::new("refresh")
                    .long("refresh")
                    .value_name("DURATION")
                    .value_parser(period)
                    .conflicts_with("once")
                    .help("Refresh the assistance periodically, while running."),
            )
            .arg(
                Arg::new("once")
                    .long("once")
                    .action(ArgAction::SetTrue)
                    .help("Refresh the assistance once, shortly after startup."),
            )
            .next_help_heading("Control")
            .arg(
                Arg::new("no-keyboard")
                    .long("no-keyboard")
                    .action(ArgAction::SetTrue)
                    .help("Do not listen to operator input. Otherwise, type \"q\" to stop."),
            )
            .arg(
                Arg::new("ipc")
                    .long("ipc")
                    .value_name("SOCKET")
                    .value_parser(value_parser!(PathBuf))
                    .help("Listen to control messages on this unix datagram socket."),
            )
            .arg(
                Arg::new("poll")
                    .long("poll")
                    .value_name("DURATION")
                    .value_parser(period)
                    .help("Pipeline status polling period. Default is 500 ms."),
            )
            .next_help_heading("Pipeline (dry run)")
            .arg(
                Arg::new("channels")
                    .short('c')
                    .long("channels")
                    .value_name("COUNT")
                    .value_parser(value_parser!(u16))
                    .help("Number of tracking channels. Default is 12."),
            )
            .arg(
                Arg::new("duration")
                    .long("duration")
                    .value_name("DURATION")
                    .value_parser(duration)
                    .help("Pipeline stops on its own after this duration."),
            )
    }

    pub fn control_settings(&self) -> ControlSettings {
        let mut settings = ControlSettings::default();

        if let Some(kinds) = self.matches.get_many::<AssistanceKind>("kinds") {
            settings.kinds = kinds.copied().collect();
        }

        if let Some(timeout) = self.matches.get_one::<Duration>("timeout") {
            settings.fetch_timeout = *timeout;
        }

        if let Some(poll) = self.matches.get_one::<Duration>("poll") {
            settings.poll_period = *poll;
        }

        settings
    }

    pub fn assistance_settings(&self) -> AssistanceSettings {
        let mut settings = AssistanceSettings {
            server: self.matches.get_one::<String>("server").cloned(),
            gzip: self.matches.get_flag("gzip"),
            ..Default::default()
        };

        if let Some(directory) = self.matches.get_one::<PathBuf>("cache") {
            settings.directory = directory.clone();
        }

        if let Some(timeout) = self.matches.get_one::<Duration>("request-timeout") {
            settings.request_timeout = *timeout;
        }

        settings.refresh = if let Some(period) = self.matches.get_one::<Duration>("refresh") {
            Refresh::Periodic(*period)
        } else if self.matches.get_flag("once") {
            Refresh::Once
        } else {
            Refresh::Disabled
        };

        settings
    }

    pub fn producer_settings(&self) -> ProducerSettings {
        ProducerSettings {
            keyboard: !self.matches.get_flag("no-keyboard"),
            ipc_socket: self.matches.get_one::<PathBuf>("ipc").cloned(),
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        let mut settings = PipelineSettings {
            duration: self.matches.get_one::<Duration>("duration").copied(),
            ..Default::default()
        };

        if let Some(channels) = self.matches.get_one::<u16>("channels") {
            settings.channels = *channels;
        }

        settings
    }
}
