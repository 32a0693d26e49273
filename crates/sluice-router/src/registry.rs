//! Built-in predicate builders

use crate::predicate::{
    AfterPredicate, BeforePredicate, BetweenPredicate, CookiePredicate, HeaderPredicate,
    HostPredicate, MethodPredicate, PathPredicate, Predicate, QueryPredicate,
};
use sluice_core::{Args, Clock, Factory, Registry, Result};
use std::sync::Arc;

/// Registry of predicate builders
pub type PredicateRegistry = Registry<dyn Predicate>;

/// Frozen predicate registry
pub type PredicateFactory = Factory<dyn Predicate>;

/// Registry preloaded with every built-in predicate; temporal predicates read
/// time from `clock`
pub fn default_predicate_registry(clock: Arc<dyn Clock>) -> Result<PredicateRegistry> {
    let mut registry = PredicateRegistry::new("predicate");

    registry.register("Method", |args: &Args| {
        let methods = args.get_string_list("methods")?;
        Ok(Arc::new(MethodPredicate::new(methods)?) as Arc<dyn Predicate>)
    })?;

    registry.register("Path", |args: &Args| {
        let patterns = args.get_string_list("patterns")?;
        Ok(Arc::new(PathPredicate::new(patterns)) as Arc<dyn Predicate>)
    })?;

    registry.register("Host", |args: &Args| {
        let patterns = args.get_string_list("patterns")?;
        Ok(Arc::new(HostPredicate::new(patterns)?) as Arc<dyn Predicate>)
    })?;

    registry.register("Header", |args: &Args| {
        let predicate = HeaderPredicate::new(args.get_str("name")?, args.get_opt_str("regexp")?)?;
        Ok(Arc::new(predicate) as Arc<dyn Predicate>)
    })?;

    registry.register("Query", |args: &Args| {
        let predicate = QueryPredicate::new(args.get_str("name")?, args.get_opt_str("regexp")?)?;
        Ok(Arc::new(predicate) as Arc<dyn Predicate>)
    })?;

    registry.register("Cookie", |args: &Args| {
        let predicate = CookiePredicate::new(args.get_str("name")?, args.get_opt_str("regexp")?)?;
        Ok(Arc::new(predicate) as Arc<dyn Predicate>)
    })?;

    let before_clock = clock.clone();
    registry.register("Before", move |args: &Args| {
        let at = args.get_datetime("datetime")?;
        Ok(Arc::new(BeforePredicate::new(at, before_clock.clone())) as Arc<dyn Predicate>)
    })?;

    let after_clock = clock.clone();
    registry.register("After", move |args: &Args| {
        let at = args.get_datetime("datetime")?;
        Ok(Arc::new(AfterPredicate::new(at, after_clock.clone())) as Arc<dyn Predicate>)
    })?;

    registry.register("Between", move |args: &Args| {
        let start = args.get_datetime("start")?;
        let end = args.get_datetime("end")?;
        Ok(Arc::new(BetweenPredicate::new(start, end, clock.clone())?) as Arc<dyn Predicate>)
    })?;

    Ok(registry)
}
