/*
 * Copyright (c) 2022 McSib
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use model_importer::import::{HashProgress, ImportProgress, ImportStage, ProgressUpdate};
use tracing::{error, warn};

const FALLBACK_TEMPLATE: &str = "{spinner} [{elapsed_precise}] {bar} {pos}/{len}";
const OVERALL_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} files";
const FILE_TEMPLATE: &str = "  {bar:40.green/white} {pos:>3}% {wide_msg}";
const BYTES_TEMPLATE: &str = "{spinner:.green} {bar:40.cyan/blue} {bytes}/{total_bytes} {wide_msg}";

/// A builder that helps in making a new [ProgressStyle] for use.
pub(crate) struct ProgressStyleBuilder {
    /// The [ProgressStyle] being built.
    progress_style: ProgressStyle,
}

impl ProgressStyleBuilder {
    /// Sets the template of the progress style, falling back to a plain bar
    /// when the template does not parse.
    ///
    /// # Arguments
    ///
    /// * `msg_template`: The template to use.
    pub(crate) fn template(mut self, msg_template: &str) -> Self {
        match self.progress_style.clone().template(msg_template) {
            Ok(style) => self.progress_style = style,
            Err(err) => {
                warn!("Template error with '{}': {}. Using fallback template.", msg_template, err);
                match self.progress_style.clone().template(FALLBACK_TEMPLATE) {
                    Ok(style) => self.progress_style = style,
                    Err(e) => {
                        error!("Fallback template also failed: {}. Using default bar.", e);
                        self.progress_style = ProgressStyle::default_bar();
                    }
                }
            }
        }
        self
    }

    /// Sets the progress style chars.
    pub(crate) fn progress_chars(mut self, chars: &str) -> Self {
        self.progress_style = self.progress_style.progress_chars(chars);
        self
    }

    pub(crate) fn build(self) -> ProgressStyle {
        self.progress_style
    }
}

impl Default for ProgressStyleBuilder {
    fn default() -> Self {
        Self {
            progress_style: ProgressStyle::default_bar(),
        }
    }
}

/// A builder that helps in initializing and configuring a new [ProgressBar] for use.
pub(crate) struct ProgressBarBuilder {
    /// The [ProgressBar] to build.
    progress_bar: ProgressBar,
}

impl ProgressBarBuilder {
    /// Creates new instance of the builder.
    ///
    /// # Arguments
    ///
    /// * `len`: Total length of the progress bar.
    pub(crate) fn new(len: u64) -> Self {
        Self {
            progress_bar: ProgressBar::new(len),
        }
    }

    /// Sets the style of the progress bar to the style given.
    pub(crate) fn style(self, progress_style: ProgressStyle) -> Self {
        self.progress_bar.set_style(progress_style);
        self
    }

    /// Sets the draw target (output) of the progress bar to the target given.
    pub(crate) fn draw_target(self, target: ProgressDrawTarget) -> Self {
        self.progress_bar.set_draw_target(target);
        self
    }

    /// Sets the steady tick's duration to the given duration.
    pub(crate) fn steady_tick(self, duration: Duration) -> Self {
        self.progress_bar.enable_steady_tick(duration);
        self
    }

    /// Returns the newly built progress bar.
    pub(crate) fn build(self) -> ProgressBar {
        self.progress_bar
    }
}

/// Two-line import display: files done overall, and the current file's percent
pub(crate) struct ImportProgressBars {
    multi: MultiProgress,
    overall: ProgressBar,
    file: ProgressBar,
}

impl ImportProgressBars {
    pub(crate) fn new(total_files: usize) -> Self {
        let multi = MultiProgress::with_draw_target(ProgressDrawTarget::stderr());

        let overall = multi.add(
            ProgressBarBuilder::new(total_files as u64)
                .style(
                    ProgressStyleBuilder::default()
                        .template(OVERALL_TEMPLATE)
                        .progress_chars("=>-")
                        .build(),
                )
                .steady_tick(Duration::from_millis(100))
                .build(),
        );
        let file = multi.add(
            ProgressBarBuilder::new(100)
                .style(
                    ProgressStyleBuilder::default()
                        .template(FILE_TEMPLATE)
                        .progress_chars("##-")
                        .build(),
                )
                .build(),
        );

        Self { multi, overall, file }
    }

    /// Hide the bars while `f` writes to the terminal
    pub(crate) fn suspend<F: FnOnce() -> R, R>(&self, f: F) -> R {
        self.multi.suspend(f)
    }

    pub(crate) fn finish(&self) {
        self.file.finish_and_clear();
        self.overall.finish();
    }
}

impl ImportProgress for ImportProgressBars {
    fn on_progress(&self, update: &ProgressUpdate) {
        self.file.set_position(u64::from(update.file_percent));
        self.file.set_message(update.message.clone());
        if update.stage == ImportStage::Finished {
            self.overall.set_position(update.current_index as u64 + 1);
        }
    }
}

/// Byte progress for a single hashed source
pub(crate) struct ByteProgressBar {
    bar: ProgressBar,
}

impl ByteProgressBar {
    pub(crate) fn new(label: String) -> Self {
        let bar = ProgressBarBuilder::new(0)
            .style(
                ProgressStyleBuilder::default()
                    .template(BYTES_TEMPLATE)
                    .progress_chars("=>-")
                    .build(),
            )
            .draw_target(ProgressDrawTarget::stderr())
            .build();
        bar.set_message(label);
        Self { bar }
    }

    pub(crate) fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl HashProgress for ByteProgressBar {
    fn on_bytes_hashed(&self, processed: u64, total: Option<u64>) {
        if let Some(total) = total {
            self.bar.set_length(total);
        }
        self.bar.set_position(processed);
    }
}
