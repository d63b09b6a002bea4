// Validated print settings applied to an operation before preview or commit.
use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind};

pub const DEFAULT_JOB_NAME: &str = "Print Job";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Portrait,
    Landscape,
}

impl Orientation {
    pub fn from_code(code: i32) -> Result<Self, Error> {
        match code {
            0 => Ok(Orientation::Portrait),
            1 => Ok(Orientation::Landscape),
            other => Err(Error::new(ErrorKind::Usage)
                .with_message(format!("invalid orientation code {other}"))),
        }
    }
}

/// Paper dimensions in points.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaperSize {
    pub width: f64,
    pub height: f64,
}

impl PaperSize {
    pub const LETTER: PaperSize = PaperSize {
        width: 612.0,
        height: 792.0,
    };
    pub const A4: PaperSize = PaperSize {
        width: 595.0,
        height: 842.0,
    };
}

/// Margins in points.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Margins {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl Margins {
    pub fn uniform(value: f64) -> Self {
        Self {
            left: value,
            top: value,
            right: value,
            bottom: value,
        }
    }
}

/// Inclusive, 1-based page range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub from: u32,
    pub to: u32,
}

impl PageRange {
    pub fn new(from: u32, to: u32) -> Result<Self, Error> {
        if from == 0 {
            return Err(Error::new(ErrorKind::Usage).with_message("first page must be at least 1"));
        }
        if to < from {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("last page {to} is before first page {from}")));
        }
        Ok(Self { from, to })
    }

    /// Parses `N` or `A-B`.
    pub fn parse(input: &str) -> Result<Self, Error> {
        let input = input.trim();
        let parse_page = |raw: &str| {
            raw.trim().parse::<u32>().map_err(|err| {
                Error::new(ErrorKind::Usage)
                    .with_message(format!("invalid page number '{}'", raw.trim()))
                    .with_hint("Use a single page like 3 or a range like 2-5.")
                    .with_source(err)
            })
        };
        match input.split_once('-') {
            Some((from, to)) => PageRange::new(parse_page(from)?, parse_page(to)?),
            None => {
                let page = parse_page(input)?;
                PageRange::new(page, page)
            }
        }
    }

    /// Clamps the end of the range to the number of pages the document has.
    pub fn clamp_to(self, page_count: u32) -> Self {
        let max = page_count.max(self.from);
        Self {
            from: self.from,
            to: self.to.clamp(self.from, max),
        }
    }

    pub fn contains(self, page: u32) -> bool {
        page >= self.from && page <= self.to
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrintSettings {
    pub paper: PaperSize,
    pub margins: Margins,
    pub page_range: Option<PageRange>,
    pub orientation: Orientation,
    pub show_print_panel: bool,
    pub show_progress_panel: bool,
    pub job_name: Option<String>,
    pub printer_name: Option<String>,
    pub pdf_path: Option<String>,
    pub page_count: u32,
}

impl Default for PrintSettings {
    fn default() -> Self {
        Self {
            paper: PaperSize::LETTER,
            margins: Margins::uniform(36.0),
            page_range: None,
            orientation: Orientation::Portrait,
            show_print_panel: true,
            show_progress_panel: true,
            job_name: None,
            printer_name: None,
            pdf_path: None,
            page_count: 0,
        }
    }
}

impl PrintSettings {
    pub fn job_name(&self) -> &str {
        self.job_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(DEFAULT_JOB_NAME)
    }

    pub fn exports_pdf(&self) -> bool {
        self.pdf_path
            .as_deref()
            .is_some_and(|path| !path.trim().is_empty())
    }

    /// Page range the job actually covers, clamped to `page_count` when known.
    pub fn effective_range(&self) -> Option<PageRange> {
        match (self.page_range, self.page_count) {
            (Some(range), 0) => Some(range),
            (Some(range), count) => Some(range.clamp_to(count)),
            (None, 0) => None,
            (None, count) => Some(PageRange { from: 1, to: count }),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        let PaperSize { width, height } = self.paper;
        if !(width.is_finite() && height.is_finite()) || width <= 0.0 || height <= 0.0 {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("paper size must be positive, got {width}x{height}")));
        }
        let Margins {
            left,
            top,
            right,
            bottom,
        } = self.margins;
        if [left, top, right, bottom]
            .iter()
            .any(|value| !value.is_finite() || *value < 0.0)
        {
            return Err(Error::new(ErrorKind::Usage).with_message("margins must be non-negative"));
        }
        if left + right >= width || top + bottom >= height {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("margins leave no printable area")
                .with_hint("Reduce the margins or use a larger paper size."));
        }
        if let Some(range) = self.page_range {
            PageRange::new(range.from, range.to)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Margins, Orientation, PageRange, PaperSize, PrintSettings};
    use crate::core::error::ErrorKind;

    #[test]
    fn default_settings_validate() {
        let settings = PrintSettings::default();
        settings.validate().expect("defaults are valid");
        assert_eq!(settings.job_name(), "Print Job");
        assert!(!settings.exports_pdf());
    }

    #[test]
    fn inverted_page_range_is_rejected() {
        let err = PageRange::new(5, 2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert!(PageRange::new(0, 2).is_err());

        let settings = PrintSettings {
            page_range: Some(PageRange { from: 4, to: 1 }),
            ..PrintSettings::default()
        };
        assert_eq!(settings.validate().unwrap_err().kind(), ErrorKind::Usage);
    }

    #[test]
    fn non_positive_paper_is_rejected() {
        let settings = PrintSettings {
            paper: PaperSize {
                width: 0.0,
                height: 792.0,
            },
            ..PrintSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn margins_must_leave_printable_area() {
        let settings = PrintSettings {
            margins: Margins::uniform(400.0),
            ..PrintSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn page_range_parsing() {
        assert_eq!(PageRange::parse("3").unwrap(), PageRange { from: 3, to: 3 });
        assert_eq!(PageRange::parse(" 2 - 5 ").unwrap(), PageRange { from: 2, to: 5 });
        assert!(PageRange::parse("two").is_err());
        assert!(PageRange::parse("5-2").is_err());
    }

    #[test]
    fn effective_range_clamps_to_page_count() {
        let settings = PrintSettings {
            page_range: Some(PageRange { from: 2, to: 10 }),
            page_count: 4,
            ..PrintSettings::default()
        };
        assert_eq!(settings.effective_range(), Some(PageRange { from: 2, to: 4 }));

        let whole = PrintSettings {
            page_count: 3,
            ..PrintSettings::default()
        };
        assert_eq!(whole.effective_range(), Some(PageRange { from: 1, to: 3 }));
        assert!(whole.effective_range().unwrap().contains(3));
    }

    #[test]
    fn orientation_codes() {
        assert_eq!(Orientation::from_code(0).unwrap(), Orientation::Portrait);
        assert_eq!(Orientation::from_code(1).unwrap(), Orientation::Landscape);
        assert!(Orientation::from_code(2).is_err());
    }
}
