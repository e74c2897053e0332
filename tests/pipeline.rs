//! End-to-end pipeline tests: parse → visitor chain → render

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use squall::parser::{parse, QueryStringParser};
use squall::render::render;
use squall::visitor::datemath::{DateMathConfig, DateMathVisitor};
use squall::visitor::field_resolver::{AliasMap, AliasResolver, FieldResolverVisitor};
use squall::visitor::include::{IncludeResolver, IncludeVisitor};
use squall::visitor::validation::{ValidationOptions, ValidationVisitor};
use squall::visitor::{QueryVisitor, VisitorChain, VisitorContext};

fn alias_resolver(entries: &[(&str, &str)]) -> Arc<AliasResolver> {
    let map: AliasMap = entries.iter().copied().collect();
    Arc::new(AliasResolver::new(map))
}

fn include_resolver(entries: &[(&str, &str)]) -> Arc<dyn IncludeResolver> {
    let map: HashMap<String, String> = entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Arc::new(map)
}

#[tokio::test]
async fn scenario_field_resolution_once_per_field() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let resolver = Arc::new(move |field: &str| {
        counter.fetch_add(1, Ordering::SeqCst);
        match field {
            "a" => Some("x".to_string()),
            "b" => Some("y".to_string()),
            "c" => Some("z".to_string()),
            _ => None,
        }
    });

    let visitor = FieldResolverVisitor::new(resolver);
    let mut ctx = VisitorContext::default();
    let doc = visitor
        .visit_document(parse("(a:1 OR b:2) AND c:3").document, &mut ctx)
        .await
        .unwrap();

    assert_eq!(render(&doc), "(x:1 OR y:2) AND z:3");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn scenario_date_math_range() {
    let reference: DateTime<Utc> = "2024-06-15T12:30:00Z".parse().unwrap();
    let visitor = DateMathVisitor::new(
        DateMathConfig::default()
            .with_date_fields(Arc::new(|f: &str| f == "created"))
            .with_reference(reference),
    );

    let mut ctx = VisitorContext::default();
    let doc = visitor
        .visit_document(parse("created:[now-7d TO now]").document, &mut ctx)
        .await
        .unwrap();

    assert_eq!(
        render(&doc),
        "created:[2024-06-08T12:30:00Z TO 2024-06-15T12:30:00Z]"
    );
}

#[tokio::test]
async fn full_chain_include_resolve_datemath_validate() {
    let reference: DateTime<Utc> = "2024-06-15T12:30:00Z".parse().unwrap();

    let chain = VisitorChain::new()
        .with(Arc::new(
            IncludeVisitor::new(QueryStringParser::new())
                .with_resolver(include_resolver(&[("recent", "when:[now-7d TO now]")])),
        ))
        .with(Arc::new(FieldResolverVisitor::new(alias_resolver(&[
            ("when", "created_at"),
            ("t", "title"),
        ]))))
        .with(Arc::new(DateMathVisitor::new(
            DateMathConfig::default()
                .with_date_fields(Arc::new(|f: &str| f == "created_at"))
                .with_reference(reference),
        )))
        .with(Arc::new(ValidationVisitor::new(ValidationOptions {
            denied_fields: ["secret".to_string()].into(),
            ..Default::default()
        })));

    let mut ctx = VisitorContext::default();
    let doc = chain
        .run(parse("@include:recent AND t:rust").document, &mut ctx)
        .await
        .unwrap();

    assert_eq!(
        render(&doc),
        "(created_at:[2024-06-08T12:30:00Z TO 2024-06-15T12:30:00Z]) AND title:rust"
    );
    assert!(ctx.validation.is_valid());
}

#[tokio::test]
async fn chain_priorities_run_include_before_resolution() {
    // the fragment's fields are resolved because include expansion (10)
    // runs before field resolution (20), regardless of registration order
    let chain = VisitorChain::new()
        .with(Arc::new(FieldResolverVisitor::new(alias_resolver(&[(
            "s", "status",
        )]))))
        .with(Arc::new(
            IncludeVisitor::new(QueryStringParser::new())
                .with_resolver(include_resolver(&[("open", "s:open")])),
        ));

    let mut ctx = VisitorContext::default();
    let doc = chain
        .run(parse("@include:open").document, &mut ctx)
        .await
        .unwrap();
    assert_eq!(render(&doc), "(status:open)");
}

/// Rewrites a bare match-all into a concrete field query, the way a
/// default-scope pass would
struct ExpandStar;

#[async_trait::async_trait]
impl QueryVisitor for ExpandStar {
    fn priority(&self) -> i32 {
        10
    }

    async fn visit_match_all<'a>(
        &self,
        _node: squall::ast::MatchAllNode,
        _ctx: &mut VisitorContext,
    ) -> squall::Result<squall::Transform<'a>> {
        let replacement = parse("status:open").document.query.expect("fragment");
        Ok(squall::Transform::Node(replacement.into_owned()))
    }
}

#[tokio::test]
async fn wildcard_only_check_is_ordering_sensitive() {
    // A rewriting pass can make a wildcard-only query concrete. Whether
    // validation sees the query before or after that rewrite is chosen
    // purely by chain priority.
    let options = ValidationOptions {
        allow_wildcard_only_queries: false,
        ..Default::default()
    };

    // validation after the rewrite: passes
    let chain = VisitorChain::new()
        .with(Arc::new(ExpandStar))
        .with(Arc::new(ValidationVisitor::new(options.clone())));
    let mut ctx = VisitorContext::default();
    chain.run(parse("*").document, &mut ctx).await.unwrap();
    assert!(ctx.validation.is_valid());

    // validation before the rewrite: the bare star is still there
    let chain = VisitorChain::new()
        .with(Arc::new(ExpandStar))
        .with(Arc::new(ValidationVisitor::new(options).with_priority(5)));
    let mut ctx = VisitorContext::default();
    chain.run(parse("*").document, &mut ctx).await.unwrap();
    assert!(!ctx.validation.is_valid());
}

#[tokio::test]
async fn cancellation_stops_between_passes() {
    let token = tokio_util::sync::CancellationToken::new();
    token.cancel();

    let chain = VisitorChain::new().with(Arc::new(FieldResolverVisitor::new(alias_resolver(
        &[("a", "x")],
    ))));
    let mut ctx = VisitorContext::default().with_cancellation(token);
    let doc = chain
        .run(parse("a:1 AND b:2").document, &mut ctx)
        .await
        .unwrap();

    // tree returned untouched and structurally valid
    assert_eq!(render(&doc), "a:1 AND b:2");
}

#[tokio::test]
async fn unresolved_fields_flow_to_validation_result() {
    let chain = VisitorChain::new().with(Arc::new(FieldResolverVisitor::new(alias_resolver(
        &[("known", "k")],
    ))));
    let mut ctx = VisitorContext::default();
    chain
        .run(parse("known:1 AND mystery:2").document, &mut ctx)
        .await
        .unwrap();

    assert!(ctx.validation.unresolved_fields.contains("mystery"));
    assert!(ctx.validation.is_valid());
}

#[tokio::test]
async fn hierarchical_resolution_in_pipeline() {
    let map: AliasMap = [("meta", "sys.meta"), ("meta.author", "sys.author")]
        .into_iter()
        .collect();
    let visitor = FieldResolverVisitor::new(Arc::new(AliasResolver::hierarchical(map)));

    let mut ctx = VisitorContext::default();
    let doc = visitor
        .visit_document(
            parse("meta.author.name:kim AND meta.tag:x").document,
            &mut ctx,
        )
        .await
        .unwrap();

    // exact-over-prefix: meta.author wins for the first, meta for the second
    assert_eq!(render(&doc), "sys.author.name:kim AND sys.meta.tag:x");
}

#[tokio::test]
async fn transformed_tree_still_renders_to_fixed_point() {
    let reference: DateTime<Utc> = "2024-06-15T12:30:00Z".parse().unwrap();
    let chain = VisitorChain::new()
        .with(Arc::new(FieldResolverVisitor::new(alias_resolver(&[(
            "when", "created",
        )]))))
        .with(Arc::new(DateMathVisitor::new(
            DateMathConfig::default()
                .with_date_fields(Arc::new(|f: &str| f == "created"))
                .with_reference(reference),
        )));

    let mut ctx = VisitorContext::default();
    let doc = chain
        .run(parse("when:[now/d TO now] OR tag:x").document, &mut ctx)
        .await
        .unwrap();
    let first = render(&doc);
    let second = render(&parse(&first).document);
    assert_eq!(first, second);
}
