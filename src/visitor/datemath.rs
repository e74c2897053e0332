//! Date-math rewrite pass
//!
//! Applies the [`DateMathEvaluator`] to term values and range bounds that
//! sit under a field the caller marks as a date field. Range upper bounds
//! round up so a month-rounded bound covers the whole month. Values the
//! evaluator cannot parse stay as written.

use std::borrow::Cow;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};

use crate::ast::{QueryNode, RangeNode, TermNode};
use crate::datemath::{DateMathEvaluator, RoundingMode};
use crate::error::Result;
use crate::visitor::context::VisitorContext;
use crate::visitor::{QueryVisitor, Transform};

/// Default chain position for [`DateMathVisitor`]; runs after field
/// resolution so date-field checks see resolved names
pub const DATE_MATH_PRIORITY: i32 = 30;

/// Predicate deciding which fields hold dates
pub type DateFieldPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Configuration for the date-math pass
#[derive(Clone)]
pub struct DateMathConfig {
    pub is_date_field: DateFieldPredicate,
    /// Instant `now` resolves to; `None` uses the system clock
    pub reference: Option<DateTime<Utc>>,
    /// Zone applied to `now` and to naive date anchors
    pub timezone: FixedOffset,
}

impl Default for DateMathConfig {
    fn default() -> Self {
        Self {
            is_date_field: Arc::new(|_| false),
            reference: None,
            timezone: FixedOffset::east_opt(0).expect("zero offset is valid"),
        }
    }
}

impl DateMathConfig {
    pub fn with_date_fields(mut self, predicate: DateFieldPredicate) -> Self {
        self.is_date_field = predicate;
        self
    }

    pub fn with_reference(mut self, reference: DateTime<Utc>) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_timezone(mut self, timezone: FixedOffset) -> Self {
        self.timezone = timezone;
        self
    }
}

/// Pass that rewrites date-math expressions into concrete timestamps
pub struct DateMathVisitor {
    evaluator: DateMathEvaluator,
    is_date_field: DateFieldPredicate,
    priority: i32,
}

impl DateMathVisitor {
    pub fn new(config: DateMathConfig) -> Self {
        let evaluator = match config.reference {
            Some(reference) => DateMathEvaluator::new(reference, config.timezone),
            None => DateMathEvaluator::system(config.timezone),
        };
        Self {
            evaluator,
            is_date_field: config.is_date_field,
            priority: DATE_MATH_PRIORITY,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    fn in_date_field(&self, ctx: &VisitorContext) -> bool {
        ctx.current_field()
            .is_some_and(|field| (self.is_date_field)(field))
    }
}

#[async_trait]
impl QueryVisitor for DateMathVisitor {
    fn priority(&self) -> i32 {
        self.priority
    }

    fn name(&self) -> &'static str {
        "date_math"
    }

    async fn visit_term<'a>(
        &self,
        mut node: TermNode<'a>,
        ctx: &mut VisitorContext,
    ) -> Result<Transform<'a>> {
        if self.in_date_field(ctx) {
            if let Some(resolved) = self.evaluator.evaluate(&node.value, RoundingMode::Down) {
                node.raw = Cow::Owned(resolved.clone());
                node.value = Cow::Owned(resolved);
            }
        }
        Ok(Transform::Node(QueryNode::Term(node)))
    }

    async fn visit_range<'a>(
        &self,
        mut node: RangeNode<'a>,
        ctx: &mut VisitorContext,
    ) -> Result<Transform<'a>> {
        if self.in_date_field(ctx) {
            if let Some(min) = node.min.as_deref() {
                if let Some(resolved) = self.evaluator.evaluate(min, RoundingMode::Down) {
                    node.min = Some(Cow::Owned(resolved));
                }
            }
            if let Some(max) = node.max.as_deref() {
                if let Some(resolved) = self.evaluator.evaluate(max, RoundingMode::Up) {
                    node.max = Some(Cow::Owned(resolved));
                }
            }
        }
        Ok(Transform::Node(QueryNode::Range(node)))
    }
}
