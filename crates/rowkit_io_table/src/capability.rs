//! Export declarations, the resolved writer capability set, and the pure
//! strategy selector.
//!
//! Capabilities are read once per export; the selector never touches the
//! declaration, so the decision table is testable on plain structs.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::row::Row;
use crate::source::{EnumDataSource, EnumRawRecord};
use crate::spec::{
    ExportEventHandler, SpecColumnDefinition, SpecConditionalFormat, SpecSheetStyles,
};

////////////////////////////////////////////////////////////////////////////////
// #region ExportDeclaration

/// Explicit writer choice overriding capability-based selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnumWriterOverride {
    /// Two-phase hybrid writer.
    Hybrid,
    /// Streaming writer with basic header styling.
    StyledStreaming,
    /// Full-document writer with chunked buffering.
    ChunkedFull,
}

/// Caller-side description of an export.
///
/// Every method is an optional capability; the default `None` means the
/// declaration does not implement it.
pub trait ExportDeclaration {
    /// Records to export. Exactly one source kind is expected.
    fn data_source(&self) -> Option<EnumDataSource<'_>> {
        None
    }

    /// Heading row.
    fn headings(&self) -> Option<Vec<String>> {
        None
    }

    /// Per-record mapping into the final row.
    fn map_record(&self, _record: &EnumRawRecord) -> Option<anyhow::Result<Row>> {
        None
    }

    /// Chunked read hint: batch size for queries, buffer size for writers.
    fn chunk_size(&self) -> Option<usize> {
        None
    }

    /// Column definitions (types, number formats, widths).
    fn columns(&self) -> Option<Vec<SpecColumnDefinition>> {
        None
    }

    /// Advanced styles.
    fn styles(&self) -> Option<SpecSheetStyles> {
        None
    }

    /// Conditional formatting rules.
    fn conditional_formats(&self) -> Option<Vec<SpecConditionalFormat>> {
        None
    }

    /// Lifecycle event handler.
    fn events(&self) -> Option<Arc<dyn ExportEventHandler>> {
        None
    }

    /// Rows frozen at the top.
    fn freeze_row(&self) -> Option<usize> {
        None
    }

    /// Auto-filter on the heading row.
    fn auto_filter(&self) -> Option<bool> {
        None
    }

    /// Explicit writer override.
    fn writer_override(&self) -> Option<EnumWriterOverride> {
        None
    }

    /// Column keys receiving a totals row.
    fn totals(&self) -> Option<Vec<String>> {
        None
    }

    /// Group row above the headings.
    fn heading_groups(&self) -> Option<Vec<String>> {
        None
    }

    /// Sheet name for spreadsheet output.
    fn sheet_name(&self) -> Option<String> {
        None
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region CapabilitySet

/// Resolved capability flags of one export; immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpecWriterCapabilities {
    /// Declaration carries conditional formatting rules.
    pub has_conditional_formatting: bool,
    /// Declaration carries advanced styles.
    pub has_advanced_styles: bool,
    /// Declaration carries column definitions.
    pub has_column_formatting: bool,
    /// Declaration carries an event handler.
    pub has_events: bool,
    /// Declaration carries a chunk size hint.
    pub has_chunked_read_hint: bool,
    /// Declaration freezes rows.
    pub has_freeze_row: bool,
    /// Declaration enables auto-filter.
    pub has_auto_filter: bool,
    /// Explicit writer override.
    pub explicit_override: Option<EnumWriterOverride>,
}

impl SpecWriterCapabilities {
    /// Read `declaration` once.
    pub fn from_declaration<D: ExportDeclaration + ?Sized>(declaration: &D) -> Self {
        Self {
            has_conditional_formatting: declaration
                .conditional_formats()
                .is_some_and(|l| !l.is_empty()),
            has_advanced_styles: declaration.styles().is_some(),
            has_column_formatting: declaration.columns().is_some_and(|l| !l.is_empty()),
            has_events: declaration.events().is_some(),
            has_chunked_read_hint: declaration.chunk_size().is_some(),
            has_freeze_row: declaration.freeze_row().is_some_and(|n| n > 0),
            has_auto_filter: declaration.auto_filter().unwrap_or(false),
            explicit_override: declaration.writer_override(),
        }
    }

    fn has_rich_features(&self) -> bool {
        self.has_advanced_styles || self.has_column_formatting
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region StrategySelector

/// Concrete spreadsheet writer variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnumWriterStrategy {
    /// Two-phase: raw spill, then styled streaming pass.
    Hybrid,
    /// Constant memory, basic header styling and font colors.
    StyledStreaming,
    /// Full styling with per-chunk buffering and fixed widths.
    ChunkedDocument,
    /// Full styling, whole document resident.
    Document,
    /// Constant memory, no styling.
    PlainStreaming,
    /// No capability signals; behaves as plain streaming.
    Default,
}

impl EnumWriterStrategy {
    /// Stable name for logs and reports.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Hybrid => "hybrid",
            Self::StyledStreaming => "styled-streaming",
            Self::ChunkedDocument => "chunked-document",
            Self::Document => "document",
            Self::PlainStreaming => "plain-streaming",
            Self::Default => "default",
        }
    }

    /// Whether the variant keeps memory constant per row.
    pub const fn is_streaming(&self) -> bool {
        matches!(
            self,
            Self::Hybrid | Self::StyledStreaming | Self::PlainStreaming | Self::Default
        )
    }
}

impl fmt::Display for EnumWriterStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick the writer variant; first matching rule wins.
pub fn select_writer_strategy(caps: &SpecWriterCapabilities) -> EnumWriterStrategy {
    match caps.explicit_override {
        Some(EnumWriterOverride::Hybrid) => return EnumWriterStrategy::Hybrid,
        Some(EnumWriterOverride::StyledStreaming) => return EnumWriterStrategy::StyledStreaming,
        Some(EnumWriterOverride::ChunkedFull) => return EnumWriterStrategy::ChunkedDocument,
        None => {}
    }

    let if_chunked = caps.has_chunked_read_hint;
    if caps.has_conditional_formatting && if_chunked {
        return EnumWriterStrategy::Hybrid;
    }
    if if_chunked && (caps.has_freeze_row || caps.has_auto_filter) && !caps.has_rich_features() {
        return EnumWriterStrategy::Hybrid;
    }
    if if_chunked && !caps.has_rich_features() && !caps.has_conditional_formatting {
        return EnumWriterStrategy::StyledStreaming;
    }
    if caps.has_rich_features() || caps.has_events {
        return if if_chunked {
            EnumWriterStrategy::ChunkedDocument
        } else {
            EnumWriterStrategy::Document
        };
    }
    EnumWriterStrategy::Default
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> SpecWriterCapabilities {
        SpecWriterCapabilities::default()
    }

    #[test]
    fn test_no_capabilities_selects_default() {
        assert_eq!(select_writer_strategy(&caps()), EnumWriterStrategy::Default);
    }

    #[test]
    fn test_conditional_with_chunk_hint_selects_hybrid() {
        let c = SpecWriterCapabilities {
            has_conditional_formatting: true,
            has_chunked_read_hint: true,
            ..caps()
        };
        assert_eq!(select_writer_strategy(&c), EnumWriterStrategy::Hybrid);
    }

    #[test]
    fn test_advanced_styles_without_chunk_hint_selects_document() {
        let c = SpecWriterCapabilities {
            has_advanced_styles: true,
            ..caps()
        };
        assert_eq!(select_writer_strategy(&c), EnumWriterStrategy::Document);
    }

    #[test]
    fn test_advanced_styles_with_chunk_hint_selects_chunked_document() {
        let c = SpecWriterCapabilities {
            has_advanced_styles: true,
            has_chunked_read_hint: true,
            ..caps()
        };
        assert_eq!(select_writer_strategy(&c), EnumWriterStrategy::ChunkedDocument);
    }

    #[test]
    fn test_chunk_hint_with_freeze_selects_hybrid() {
        let c = SpecWriterCapabilities {
            has_chunked_read_hint: true,
            has_freeze_row: true,
            ..caps()
        };
        assert_eq!(select_writer_strategy(&c), EnumWriterStrategy::Hybrid);

        let c_cols = SpecWriterCapabilities {
            has_column_formatting: true,
            ..c
        };
        assert_eq!(select_writer_strategy(&c_cols), EnumWriterStrategy::ChunkedDocument);
    }

    #[test]
    fn test_chunk_hint_alone_selects_styled_streaming() {
        let c = SpecWriterCapabilities {
            has_chunked_read_hint: true,
            ..caps()
        };
        assert_eq!(select_writer_strategy(&c), EnumWriterStrategy::StyledStreaming);
    }

    #[test]
    fn test_events_only_selects_document() {
        let c = SpecWriterCapabilities {
            has_events: true,
            ..caps()
        };
        assert_eq!(select_writer_strategy(&c), EnumWriterStrategy::Document);

        let c_chunked = SpecWriterCapabilities {
            has_chunked_read_hint: true,
            ..c
        };
        // rule 6 fires before events are considered
        assert_eq!(select_writer_strategy(&c_chunked), EnumWriterStrategy::StyledStreaming);
    }

    #[test]
    fn test_overrides_win_in_priority_order() {
        let c = SpecWriterCapabilities {
            has_advanced_styles: true,
            explicit_override: Some(EnumWriterOverride::StyledStreaming),
            ..caps()
        };
        assert_eq!(select_writer_strategy(&c), EnumWriterStrategy::StyledStreaming);

        let c = SpecWriterCapabilities {
            explicit_override: Some(EnumWriterOverride::ChunkedFull),
            ..caps()
        };
        assert_eq!(select_writer_strategy(&c), EnumWriterStrategy::ChunkedDocument);
    }

    struct StyledDeclaration;

    impl ExportDeclaration for StyledDeclaration {
        fn styles(&self) -> Option<SpecSheetStyles> {
            Some(SpecSheetStyles::default())
        }

        fn chunk_size(&self) -> Option<usize> {
            Some(500)
        }

        fn auto_filter(&self) -> Option<bool> {
            Some(false)
        }
    }

    #[test]
    fn test_capabilities_follow_declaration() {
        let c = SpecWriterCapabilities::from_declaration(&StyledDeclaration);
        assert!(c.has_advanced_styles);
        assert!(c.has_chunked_read_hint);
        assert!(!c.has_auto_filter);
        assert!(!c.has_column_formatting);
        assert_eq!(select_writer_strategy(&c), EnumWriterStrategy::ChunkedDocument);
    }
}
