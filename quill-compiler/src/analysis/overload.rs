use tracing::debug;

use super::types::Type;
use crate::symbols::{max_arity, min_arity, MemberRef, ParamInfo, SymbolTable};

const EXACT_MATCH: u32 = 2;
const LOOSE_MATCH: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverloadChoice {
    pub member: MemberRef,
    /// False when no candidate accepted the arguments and `member` is the fallback.
    pub matched: bool,
}

/// Picks the callable candidate that best fits `arguments`.
///
/// Candidates are first filtered by arity (defaults and variadics widen the accepted
/// range), then each parameter is scored: an exact type match beats a match through
/// `Any` or a union, and an incompatible argument drops the candidate. The highest
/// total wins and ties go to the earliest declaration. When nothing survives, the
/// first candidate is returned with `matched == false`.
pub fn resolve_overload(
    symbols: &SymbolTable,
    candidates: &[MemberRef],
    arguments: &[Type],
) -> Option<OverloadChoice> {
    let callable: Vec<(MemberRef, Vec<ParamInfo>)> = candidates
        .iter()
        .filter_map(|member| symbols.parameters(*member).map(|params| (*member, params)))
        .collect();
    let (fallback, _) = callable.first()?;

    let mut best: Option<(MemberRef, u32)> = None;
    for (member, params) in &callable {
        if !accepts_count(params, arguments.len()) {
            continue;
        }
        let Some(score) = score(params, arguments) else {
            continue;
        };
        if best.map_or(true, |(_, best_score)| score > best_score) {
            best = Some((*member, score));
        }
    }

    match best {
        Some((member, score)) => {
            debug!(
                target: "quill::overload",
                chosen = %symbols.member_name(member),
                score,
                candidates = callable.len(),
                "overload selected"
            );
            Some(OverloadChoice {
                member,
                matched: true,
            })
        }
        None => Some(OverloadChoice {
            member: *fallback,
            matched: false,
        }),
    }
}

fn accepts_count(params: &[ParamInfo], count: usize) -> bool {
    count >= min_arity(params) && max_arity(params).map_or(true, |max| count <= max)
}

fn score(params: &[ParamInfo], arguments: &[Type]) -> Option<u32> {
    let variadic = params.iter().find(|param| param.is_variadic);
    let mut total = 0;
    for (index, argument) in arguments.iter().enumerate() {
        let param = match params.get(index) {
            Some(param) if !param.is_variadic => param,
            _ => variadic?,
        };
        total += compatibility(&param.ty, argument)?;
    }
    Some(total)
}

fn compatibility(param: &Type, argument: &Type) -> Option<u32> {
    if param.is_any() || argument.is_any() {
        return Some(LOOSE_MATCH);
    }
    if param == argument {
        return Some(EXACT_MATCH);
    }
    if argument.is_assignable_to(param) || (argument.is_union() && argument.overlaps(param)) {
        return Some(LOOSE_MATCH);
    }
    None
}
