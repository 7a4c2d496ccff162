//! Wires the configuration, API client, pipeline and renderer together.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use buildpush_api::Client;
use buildpush_push::{PushConfig, PushRequest, Pusher};
use buildpush_transfer::SinkConfig;

use crate::config::Config;
use crate::render;

/// Arguments of one `push` invocation.
#[derive(Debug, Clone)]
pub struct PushArgs {
    pub path: PathBuf,
    pub spec: String,
    pub user_version: String,
    pub fix_permissions: bool,
    /// Overrides the configured chunk grouping.
    pub max_chunk_group: Option<usize>,
}

/// Pushes one build. Ctrl-C cancels the push.
pub async fn push(config: Config, args: PushArgs) -> anyhow::Result<()> {
    let api_key = config.api_key()?;
    let client = Client::new(&api_key)?.with_base_url(&config.api_base_url);
    tracing::debug!(base_url = client.base_url(), "API client ready");

    let push_config = PushConfig {
        sink: SinkConfig {
            max_chunk_group: args.max_chunk_group.unwrap_or(config.max_chunk_group).max(1),
            ..SinkConfig::default()
        },
        ..PushConfig::default()
    };

    let mut pusher = Pusher::new(push_config)?;
    let events = pusher.take_events().context("push events already taken")?;
    let renderer = tokio::spawn(render::render(events, render::progress_bar()));
    let cancel = pusher.cancel_token();

    let request = PushRequest {
        path: args.path,
        spec: args.spec,
        user_version: args.user_version,
        fix_permissions: args.fix_permissions,
    };

    let result = {
        let push = pusher.push(Arc::new(client), request);
        tokio::pin!(push);

        tokio::select! {
            result = &mut push => result,
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("interrupted, cancelling push");
                cancel.cancel();
                push.await
            }
        }
    };
    // Closes the event stream so the renderer finishes.
    drop(pusher);
    let completed = renderer.await?;

    result?;
    if let Some(summary) = completed {
        for line in render::summary_lines(&summary) {
            println!("{line}");
        }
    }
    Ok(())
}
