//! Per-pair processing: normalize, compose, render, transcode, deliver.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;

use wm_av::{audio, AudioInfo, FormatNormalizer, ToolRegistry, Workspace};
use wm_core::config::Config;
use wm_core::{display_stem, DeliveryFormat, Error, NamingTemplate, Pair};

use crate::context::PairContext;
use crate::export::{Exporter, FfmpegTranscoder};

/// Turns one pair into one deliverable.
#[async_trait]
pub trait PairProcessor: Send + Sync {
    /// Batch-level checks run before any pair starts. Errors returned here
    /// abort the batch.
    async fn preflight(&self, _pairs: &[Pair]) -> wm_core::Result<()> {
        Ok(())
    }

    /// Where `pair`'s deliverable goes if nothing else claims that path.
    /// The scheduler calls this for every pair before the batch starts and
    /// resolves clashes; the result arrives as [`PairContext::destination`].
    fn destination(&self, _pair: &Pair, _output_root: &Path) -> Option<PathBuf> {
        None
    }

    /// Process one pair and return the path of its deliverable.
    async fn process(&self, pair: &Pair, ctx: &PairContext) -> wm_core::Result<PathBuf>;
}

/// The production [`PairProcessor`].
pub struct WatermarkPipeline {
    normalizer: Arc<FormatNormalizer>,
    exporter: Exporter,
    naming: NamingTemplate,
    delivery: DeliveryFormat,
    auto_convert: bool,
    keep_intermediate: bool,
    workspace_root: Option<PathBuf>,
    seed: Option<u64>,
}

impl WatermarkPipeline {
    pub fn new(normalizer: Arc<FormatNormalizer>, exporter: Exporter) -> Self {
        Self {
            normalizer,
            exporter,
            naming: NamingTemplate::default(),
            delivery: DeliveryFormat::Mp3,
            auto_convert: true,
            keep_intermediate: false,
            workspace_root: None,
            seed: None,
        }
    }

    /// Wire the pipeline from configuration: native normalizer and renderer,
    /// ffmpeg transcoder from `tools`.
    pub fn from_config(config: &Config, tools: Arc<ToolRegistry>) -> Self {
        let normalizer = Arc::new(FormatNormalizer::from_config(config, &tools));
        let transcoder = Arc::new(FfmpegTranscoder::new(
            tools,
            config.delivery.clone(),
            config.timeouts.transcode(),
        ));
        let exporter = Exporter::new(transcoder, config.timeouts.render());
        Self::new(normalizer, exporter)
            .with_naming(config.naming.clone())
            .with_delivery(config.delivery.format)
            .with_auto_convert(config.batch.auto_convert)
            .with_keep_intermediate(config.batch.keep_intermediate)
    }

    pub fn with_naming(mut self, naming: NamingTemplate) -> Self {
        self.naming = naming;
        self
    }

    pub fn with_delivery(mut self, format: DeliveryFormat) -> Self {
        self.delivery = format;
        self
    }

    pub fn with_auto_convert(mut self, enabled: bool) -> Self {
        self.auto_convert = enabled;
        self
    }

    pub fn with_keep_intermediate(mut self, enabled: bool) -> Self {
        self.keep_intermediate = enabled;
        self
    }

    /// Parent directory for per-pair workspaces (system temp by default).
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = Some(root.into());
        self
    }

    /// Seed for random insertion patterns; pair `i` uses `seed + i`.
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Deliverable path for `pair` under `output_root`:
    /// `<output_root>/<watermark stem>/<templated name>`.
    pub fn deliverable_path(&self, pair: &Pair, output_root: &Path) -> PathBuf {
        let song = display_stem(&pair.primary);
        let tag = display_stem(&pair.watermark);
        let name = self
            .naming
            .file_name(&song, &tag, self.delivery.extension());
        output_root.join(&tag).join(name)
    }

    async fn usable_input(&self, path: &Path) -> wm_core::Result<PathBuf> {
        if self.auto_convert {
            self.normalizer.convert(path).await
        } else {
            Ok(path.to_path_buf())
        }
    }

    fn rng_for(&self, index: usize) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(index as u64)),
            None => StdRng::from_entropy(),
        }
    }
}

async fn probe(path: &Path) -> wm_core::Result<AudioInfo> {
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || audio::probe_audio(&owned))
        .await
        .map_err(|e| Error::Internal(format!("probe task failed: {e}")))?
}

#[async_trait]
impl PairProcessor for WatermarkPipeline {
    async fn preflight(&self, pairs: &[Pair]) -> wm_core::Result<()> {
        self.exporter.transcoder().preflight()?;
        if self.auto_convert {
            self.normalizer.preflight(
                pairs
                    .iter()
                    .flat_map(|p| [p.primary.as_path(), p.watermark.as_path()]),
            )?;
        }
        Ok(())
    }

    fn destination(&self, pair: &Pair, output_root: &Path) -> Option<PathBuf> {
        Some(self.deliverable_path(pair, output_root))
    }

    async fn process(&self, pair: &Pair, ctx: &PairContext) -> wm_core::Result<PathBuf> {
        let primary = self.usable_input(&pair.primary).await?;
        let watermark = self.usable_input(&pair.watermark).await?;

        let primary_info = probe(&primary).await?;
        let watermark_info = probe(&watermark).await?;

        let settings = ctx.settings.as_ref();
        let (composition, gain) = {
            let mut rng = self.rng_for(ctx.index);
            wm_compose::build(
                settings.pattern,
                primary_info.duration_secs,
                watermark_info.duration_secs,
                settings,
                &mut rng,
            )?
        };

        let workspace = Workspace::new(self.workspace_root.as_deref(), &ctx.temps)?;
        let intermediate = self
            .exporter
            .render(
                &primary,
                &watermark,
                &composition,
                &gain,
                &workspace.temp_file("intermediate.wav"),
            )
            .await?;

        let encoded = workspace.temp_file(&format!("deliverable.{}", self.delivery.extension()));
        let encoded = self
            .exporter
            .transcode(&intermediate, &encoded, self.delivery)
            .await?;

        let dest = ctx
            .destination
            .clone()
            .unwrap_or_else(|| self.deliverable_path(pair, &ctx.output_root));
        workspace.finalize(&encoded, &dest)?;

        if self.keep_intermediate {
            let kept = dest.with_file_name(format!(
                "{}.intermediate.wav",
                display_stem(&dest)
            ));
            // The deliverable is already in place; losing the extra copy
            // does not fail the pair.
            if let Err(e) = workspace.finalize(&intermediate, &kept) {
                tracing::warn!(
                    kept = %kept.display(),
                    error = %e,
                    "failed to keep intermediate"
                );
            }
        }
        workspace.close();

        tracing::info!(
            primary = %pair.primary_name(),
            watermark = %pair.watermark_name(),
            insertions = composition.insertion_count(),
            dest = %dest.display(),
            "pair delivered"
        );
        Ok(dest)
    }
}
