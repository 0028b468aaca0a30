//! Fitting the widget grid to the space it is given.

use crate::config::FitConfig;
use crate::widget::{Dimensions, FitProposal, WidgetHandle};

/// How the terminal is currently laid out by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayoutMode {
    pub fullscreen: bool,
    /// An auxiliary on-screen control row sits under the terminal.
    pub aux_controls: bool,
}

#[derive(Debug, Clone)]
pub struct ScreenFitter {
    config: FitConfig,
}

impl ScreenFitter {
    pub fn new(config: FitConfig) -> Self {
        Self { config }
    }

    /// Column correction for the fixed-width chrome margin, in cells.
    pub fn col_offset(&self, font_size: f64) -> i32 {
        if !(font_size > 0.0) {
            return 0;
        }
        (self.config.chrome_margin_px / font_size).ceil() as i32
    }

    /// Corrected target size, or `None` when the proposal is not ready or the
    /// correction would leave an empty axis.
    pub fn compute(
        &self,
        proposal: Option<FitProposal>,
        font_size: f64,
        layout: LayoutMode,
    ) -> Option<Dimensions> {
        let proposal = proposal?;
        if proposal.rows == 0 || proposal.cols == 0 {
            return None;
        }
        let offset = self.col_offset(font_size);
        let (cols, mut rows) = if layout.fullscreen {
            (
                i32::from(proposal.cols).saturating_sub(offset),
                i32::from(proposal.rows) - i32::from(self.config.fullscreen_row_trim),
            )
        } else {
            (i32::from(proposal.cols).saturating_add(offset), i32::from(proposal.rows))
        };
        if layout.aux_controls && !layout.fullscreen {
            rows -= i32::from(self.config.aux_control_rows);
        }
        let cols = cols.min(i32::from(u16::MAX));
        rows = rows.min(i32::from(u16::MAX));
        if rows <= 0 || cols <= 0 {
            return None;
        }
        Dimensions::new(rows as u16, cols as u16)
    }

    /// Runs one fit pass against the widget and resizes it.
    ///
    /// Returns the applied size; `None` means the layout is not ready yet and
    /// the caller should retry on the next layout tick.
    pub fn fit(&self, widget: &WidgetHandle, layout: LayoutMode) -> Option<Dimensions> {
        widget
            .with(|w| {
                let target = self.compute(w.propose_dimensions(), w.font_size(), layout)?;
                w.resize(target);
                Some(target)
            })
            .flatten()
    }
}
