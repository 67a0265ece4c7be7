//! Dotted navigation paths used for eager loading.

use crate::context::DataContext;
use crate::error::{DataError, DataResult};
use crate::model::entity::Entity;
use std::fmt::{Display, Formatter};

/// A relationship path such as `orders` or `orders.lines`.
///
/// Each segment names one navigation on the entity reached by the previous
/// segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NavigationPath {
    segments: Vec<String>,
}

impl NavigationPath {
    pub fn parse(path: &str) -> DataResult<Self> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(DataError::ArgumentNull("navigation path"));
        }

        let mut segments = Vec::new();
        for segment in trimmed.split('.') {
            let segment = segment.trim();
            if segment.is_empty() {
                return Err(DataError::ArgumentNull("navigation path segment"));
            }
            segments.push(segment.to_string());
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// First segment, the navigation on the current entity.
    pub fn head(&self) -> &str {
        self.segments.first().map_or("", String::as_str)
    }

    /// Case-insensitive match on the first segment.
    pub fn head_is(&self, name: &str) -> bool {
        self.head().eq_ignore_ascii_case(name)
    }

    /// Path below the first segment, if any.
    pub fn rest(&self) -> Option<NavigationPath> {
        if self.segments.len() < 2 {
            return None;
        }
        Some(Self {
            segments: self.segments[1..].to_vec(),
        })
    }

    /// Continues the include into `children` when the path is nested.
    pub fn include_rest<C: Entity>(
        &self,
        ctx: &DataContext,
        children: &mut [C],
        tracking: bool,
    ) -> DataResult<()> {
        match self.rest() {
            Some(rest) => C::include(ctx, children, &rest, tracking),
            None => Ok(()),
        }
    }
}

impl Display for NavigationPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}
