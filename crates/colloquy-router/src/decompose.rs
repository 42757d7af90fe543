//! Query decomposition and synonym expansion.

use std::collections::BTreeMap;

use colloquy_core::config::RouterConfig;
use colloquy_core::types::{IntentLabel, QueryScope, SubQuery};

use crate::extract::{
    comparison_targets, conjoined_targets, extract_keywords, singularize, ConjoinedTargets,
    ScopePhrase,
};

/// Build the sub-query plan for an utterance.
///
/// Returns the effective scope (entity lookups upgrade `Specific`) and the
/// sub-queries to dispatch. An empty plan means the utterance is searched
/// as-is.
pub fn decompose(
    text: &str,
    label: IntentLabel,
    scope: QueryScope,
    phrases: &[ScopePhrase],
    entities: &[String],
    config: &RouterConfig,
) -> (QueryScope, Vec<SubQuery>) {
    if !(label.is_information_seeking() || label == IntentLabel::General) {
        return (scope, Vec::new());
    }

    if !entities.is_empty() {
        return (QueryScope::EntityLookup, entity_variants(entities, config));
    }

    if scope == QueryScope::All {
        if let Some(plan) = dimension_plan(text, phrases, config) {
            return (scope, plan);
        }
    }

    if label == IntentLabel::Comparison {
        let targets = comparison_targets(text);
        if !targets.is_empty() {
            return (scope, target_plan(text, &targets));
        }
    }

    if scope == QueryScope::Specific {
        if let Some(conjoined) = conjoined_targets(text) {
            return (scope, conjoined_plan(&conjoined));
        }
    }

    (scope, Vec::new())
}

/// Exact name, name + role terms, name + department terms, per entity.
fn entity_variants(entities: &[String], config: &RouterConfig) -> Vec<SubQuery> {
    let mut plan = Vec::with_capacity(entities.len() * 3);
    for entity in entities {
        plan.push(SubQuery {
            text: entity.clone(),
            target: Some(entity.clone()),
        });
        if !config.role_terms.is_empty() {
            plan.push(SubQuery {
                text: format!("{} {}", entity, config.role_terms.join(" ")),
                target: Some(entity.clone()),
            });
        }
        if !config.department_terms.is_empty() {
            plan.push(SubQuery {
                text: format!("{} {}", entity, config.department_terms.join(" ")),
                target: Some(entity.clone()),
            });
        }
    }
    plan
}

/// One sub-query per value of the first phrase naming a configured
/// dimension, with that "all X" phrase replaced by "the <value> <x>".
fn dimension_plan(text: &str, phrases: &[ScopePhrase], config: &RouterConfig) -> Option<Vec<SubQuery>> {
    phrases.iter().find_map(|phrase| {
        let singular = singularize(&phrase.noun);
        let values = dimension_values(&phrase.noun, &singular, config)?;
        let plan: Vec<SubQuery> = values
            .iter()
            .map(|value| SubQuery {
                text: format!(
                    "{}the {} {}{}",
                    &text[..phrase.start],
                    value,
                    singular,
                    &text[phrase.end..]
                ),
                target: Some(value.clone()),
            })
            .collect();
        Some(plan)
    })
}

fn dimension_values<'a>(noun: &str, singular: &str, config: &'a RouterConfig) -> Option<&'a Vec<String>> {
    config
        .dimensions
        .iter()
        .find_map(|(name, values)| {
            let name = name.to_lowercase();
            (name == noun || name == singular || singularize(&name) == singular).then_some(values)
        })
        .filter(|values| !values.is_empty())
}

/// One sub-query per conjoined target, each keeping the rest of the question.
fn conjoined_plan(conjoined: &ConjoinedTargets) -> Vec<SubQuery> {
    conjoined
        .targets
        .iter()
        .map(|target| SubQuery {
            text: format!("{}{}{}", conjoined.prefix, target, conjoined.suffix),
            target: Some(target.clone()),
        })
        .collect()
}

/// One sub-query per comparison target, carrying the context keywords the
/// targets do not already mention.
fn target_plan(text: &str, targets: &[String]) -> Vec<SubQuery> {
    let target_words: Vec<String> = targets
        .iter()
        .flat_map(|t| extract_keywords(t))
        .collect();
    let context: Vec<String> = extract_keywords(text)
        .into_iter()
        .filter(|k| !target_words.contains(k))
        .collect();

    targets
        .iter()
        .map(|target| {
            let text = if context.is_empty() {
                target.clone()
            } else {
                format!("{} {}", target, context.join(" "))
            };
            SubQuery {
                text,
                target: Some(target.clone()),
            }
        })
        .collect()
}

/// Synonyms known for each keyword, looked up in both directions.
pub fn synonym_map(
    keywords: &[String],
    dictionary: &BTreeMap<String, Vec<String>>,
) -> BTreeMap<String, Vec<String>> {
    let mut map = BTreeMap::new();
    for keyword in keywords {
        let singular = singularize(keyword);
        if let Some(syns) = dictionary.get(keyword).or_else(|| dictionary.get(&singular)) {
            if !syns.is_empty() {
                map.insert(keyword.clone(), syns.clone());
            }
            continue;
        }
        for (term, syns) in dictionary {
            if syns.iter().any(|s| s == keyword || *s == singular) {
                let mut related = vec![term.clone()];
                related.extend(syns.iter().filter(|s| *s != keyword && **s != singular).cloned());
                map.insert(keyword.clone(), related);
                break;
            }
        }
    }
    map
}

/// `query` followed by every synonym of its keywords. Returns `None` when
/// there is nothing to add.
pub fn expand_with_synonyms(query: &str, synonyms: &BTreeMap<String, Vec<String>>) -> Option<String> {
    let lowered = query.to_lowercase();
    let mut extra: Vec<&str> = Vec::new();
    for syns in synonyms.values() {
        for syn in syns {
            if !lowered.contains(syn.as_str()) && !extra.contains(&syn.as_str()) {
                extra.push(syn.as_str());
            }
        }
    }
    if extra.is_empty() {
        None
    } else {
        Some(format!("{} {}", query.trim(), extra.join(" ")))
    }
}
