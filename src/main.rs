#![doc(
    html_logo_url = "https://raw.githubusercontent.com/nav-solutions/.github/master/logos/logo2.jpg"
)]
#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]

/*
 * GNSS-CONTROL is part of the nav-solutions framework.
 * Authors: Guillaume W. Bres <guillaume.bressaix@gmail.com> et al,
 * (cf. https://github.com/nav-solutions/gnss-control/graphs/contributors)
 * This framework is shipped under Mozilla Public V2 license.
 *
 * Documentation: https://github.com/nav-solutions/gnss-control
 */

extern crate gnss_rs as gnss;

use std::sync::Arc;

use env_logger::{Builder, Target};

use log::{error, info};

mod assistance;
mod bus;
mod cli;
mod command;
mod control;
mod lifecycle;
mod pipeline;
mod producer;
mod runtime;
mod settings;

#[cfg(test)]
mod fake;

use crate::{
    assistance::{AssistanceClient, AssistanceService, AssistanceStore, service},
    bus::ProducerId,
    cli::Cli,
    command::code,
    control::ControlPlane,
    lifecycle::ReceiverState,
    pipeline::DryRun,
    producer::{Collector, IpcListener, OperatorListener},
};

/// Deploys the receiver, returns once it has stopped.
async fn run<S: AssistanceService>(cli: &Cli, service: S) -> ReceiverState {
    let assistance = cli.assistance_settings();
    let producers = cli.producer_settings();
    let pipeline = cli.pipeline_settings();
    let settings = cli.control_settings();

    let store = AssistanceStore::new(&assistance.directory, assistance.gzip);
    let client = Arc::new(AssistanceClient::new(service, store));

    let kinds = settings.kinds.clone();

    let mut control = ControlPlane::new(
        settings,
        DryRun::new(pipeline.channels, pipeline.duration),
        Arc::clone(&client),
    );

    if producers.keyboard {
        info!("type \"q\" then enter to stop");
        control = control.with_producer(Box::new(OperatorListener::stdin()));
    }

    if let Some(path) = &producers.ipc_socket {
        match IpcListener::bind(path) {
            Ok(listener) => control = control.with_producer(Box::new(listener)),
            Err(e) => error!("failed to bind {}: {}", path.display(), e),
        }
    }

    control = control.with_producer(Box::new(Collector::new(
        client,
        kinds,
        assistance.refresh,
        assistance.request_timeout,
    )));

    let interrupt = control.publisher(ProducerId::Operator);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = interrupt.publish(code::STOP, Vec::new());
        }
    });

    control.run().await;

    let status = control.status();

    info!(
        "{} message(s) processed, {} action(s) applied",
        status.processed_messages(),
        status.applied_actions()
    );

    status.state()
}

#[tokio::main]
pub async fn main() {
    let mut builder = Builder::from_default_env();

    builder
        .target(Target::Stdout)
        .format_timestamp_secs()
        .format_module_path(false)
        .init();

    // cli
    let cli = Cli::new();
    let assistance = cli.assistance_settings();

    let state = match &assistance.server {
        Some(server) => {
            info!("assistance server: {}", server);
            run(
                &cli,
                service::TcpService::new(server, assistance.request_timeout),
            )
            .await
        },
        None => {
            info!("no assistance server: offline mode");
            run(&cli, service::Offline).await
        },
    };

    // stdin reader may still be pending
    std::process::exit(if state == ReceiverState::Stopped {
        0
    } else {
        1
    });
}
