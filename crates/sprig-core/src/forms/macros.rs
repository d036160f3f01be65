use tracing::trace;

use crate::ast::{datum_from_value, datum_to_value, Datum, DatumKind, Span};
use crate::compiler::scopes::Resolution;
use crate::compiler::state::CompilerState;
use crate::error::SprigError;
use crate::namespaces::Var;
use crate::symbols::split_qualified;
use crate::value::Value;

const MAX_EXPANSIONS: usize = 1024;

/// Heads `desugar` rewrites. They stay unqualified inside syntax-quote.
pub(super) const DERIVED_FORMS: &[&str] = &[
    "when", "when-not", "if-not", "cond", "and", "or", "->", "->>", "defn", "defn-", "comment",
];

fn sym(name: &str, span: Span) -> Datum {
    Datum::symbol(name, span)
}

fn list(items: Vec<Datum>, span: Span) -> Datum {
    Datum::list(items, span)
}

/// Expands `datum` until its head is no longer a macro. Returns the result
/// and the number of steps taken.
pub fn macroexpand(state: &mut CompilerState, datum: &Datum) -> Result<(Datum, usize), SprigError> {
    let mut current = datum.clone();
    let mut steps = 0;
    while let Some(next) = expand_once(state, &current)? {
        if next.same_shape(&current) {
            break;
        }
        trace!(from = %current, to = %next, "macroexpanded");
        current = next;
        steps += 1;
        if steps > MAX_EXPANSIONS {
            return Err(datum.compile_error(format!("macro expansion of {} does not terminate", datum)));
        }
    }
    Ok((current, steps))
}

fn expand_once(state: &mut CompilerState, datum: &Datum) -> Result<Option<Datum>, SprigError> {
    let Some(head) = datum.as_list().and_then(|items| items.first()).and_then(Datum::as_symbol) else {
        return Ok(None);
    };
    match state.scopes.lookup(&state.rt, head, state.level())? {
        Some(Resolution::Var(var)) if var.flags().is_macro => apply_macro(state, &var, datum).map(Some),
        Some(_) => Ok(None),
        None => desugar(state, datum),
    }
}

/// Calls the macro with its unevaluated arguments as data.
fn apply_macro(state: &CompilerState, var: &Var, datum: &Datum) -> Result<Datum, SprigError> {
    let items = datum.as_list().unwrap_or(&[]);
    let callee = var.deref_value()?;
    let args: Vec<Value> = items[1..].iter().map(datum_to_value).collect();
    let result = state
        .rt
        .apply(&callee, &args)
        .map_err(|err| err.with_span(datum.span))?;
    datum_from_value(&result, datum.span)
}

/// One rewrite of a built-in derived form, or `None` when the head is not
/// one of them.
pub fn desugar(state: &mut CompilerState, datum: &Datum) -> Result<Option<Datum>, SprigError> {
    let Some(items) = datum.as_list() else {
        return Ok(None);
    };
    let Some(head) = items.first().and_then(Datum::as_symbol) else {
        return Ok(None);
    };
    let span = datum.span;
    let args = &items[1..];
    let rewritten = match head {
        "when" | "when-not" => {
            let (test, body) = args
                .split_first()
                .ok_or_else(|| datum.syntax_error(format!("{} requires a test", head)))?;
            let mut block = vec![sym("do", span)];
            block.extend(body.iter().cloned());
            let block = list(block, span);
            if head == "when" {
                list(vec![sym("if", span), test.clone(), block], span)
            } else {
                list(vec![sym("if", span), test.clone(), Datum::nil(span), block], span)
            }
        }
        "if-not" => match args {
            [test, then] => list(vec![sym("if", span), test.clone(), Datum::nil(span), then.clone()], span),
            [test, then, otherwise] => list(
                vec![sym("if", span), test.clone(), otherwise.clone(), then.clone()],
                span,
            ),
            _ => return Err(datum.syntax_error("if-not takes a test and one or two branches")),
        },
        "cond" => cond(args, datum)?,
        "and" => match args {
            [] => Datum::new(DatumKind::Bool(true), span),
            [only] => only.clone(),
            [first, rest @ ..] => short_circuit(state, "and", first, rest, span),
        },
        "or" => match args {
            [] => Datum::nil(span),
            [only] => only.clone(),
            [first, rest @ ..] => short_circuit(state, "or", first, rest, span),
        },
        "->" | "->>" => thread(head == "->>", args, datum)?,
        "defn" | "defn-" => defn(head == "defn-", args, datum)?,
        "comment" => Datum::nil(span),
        _ => return interop_sugar(state, head, args, datum),
    };
    Ok(Some(rewritten))
}

fn cond(args: &[Datum], datum: &Datum) -> Result<Datum, SprigError> {
    if args.len() % 2 != 0 {
        return Err(datum.syntax_error("cond requires an even number of forms"));
    }
    let span = datum.span;
    Ok(args.chunks(2).rev().fold(Datum::nil(span), |otherwise, pair| {
        list(vec![sym("if", span), pair[0].clone(), pair[1].clone(), otherwise], span)
    }))
}

/// `(and a b ...)` as `(let [t a] (if t (and b ...) t))`; `or` swaps the
/// branches.
fn short_circuit(state: &CompilerState, op: &str, first: &Datum, rest: &[Datum], span: Span) -> Datum {
    let temp = sym(&state.rt.gensym(op), span);
    let mut tail = vec![sym(op, span)];
    tail.extend(rest.iter().cloned());
    let tail = list(tail, span);
    let (then, otherwise) = if op == "and" { (tail, temp.clone()) } else { (temp.clone(), tail) };
    list(
        vec![
            sym("let", span),
            Datum::new(DatumKind::Vector(vec![temp.clone(), first.clone()]), span),
            list(vec![sym("if", span), temp, then, otherwise], span),
        ],
        span,
    )
}

fn thread(last: bool, args: &[Datum], datum: &Datum) -> Result<Datum, SprigError> {
    let (init, steps) = args
        .split_first()
        .ok_or_else(|| datum.syntax_error("threading requires an initial value"))?;
    Ok(steps.iter().fold(init.clone(), |acc, step| match step.as_list() {
        Some(items) if !items.is_empty() => {
            let mut call = items.to_vec();
            if last {
                call.push(acc);
            } else {
                call.insert(1, acc);
            }
            list(call, step.span)
        }
        _ => list(vec![step.clone(), acc], step.span),
    }))
}

/// `(defn name doc? & fn-tail)` as `(def name (fn name & fn-tail))`.
fn defn(private: bool, args: &[Datum], datum: &Datum) -> Result<Datum, SprigError> {
    let span = datum.span;
    let (name, mut rest) = args
        .split_first()
        .ok_or_else(|| datum.syntax_error("defn requires a name"))?;
    let fn_name = name
        .as_symbol()
        .ok_or_else(|| name.syntax_error("First argument to defn must be a symbol"))?;
    if let [doc, more @ ..] = rest {
        if matches!(doc.kind, DatumKind::Str(_)) && !more.is_empty() {
            rest = more;
        }
    }
    if rest.is_empty() {
        return Err(datum.syntax_error(format!("defn {} has no parameter vector", name)));
    }
    let mut target = name.clone();
    if private && !target.has_flag("private") {
        target.flags.push("private".to_string());
    }
    let mut fn_form = vec![sym("fn", span), Datum::symbol(fn_name, name.span)];
    fn_form.extend(rest.iter().cloned());
    Ok(list(vec![sym("def", span), target, list(fn_form, span)], span))
}

/// Member-access shorthand: `(.m x args)`, `(.-f x)`, `(Class. args)` and
/// `(Class/m args)`.
fn interop_sugar(state: &CompilerState, head: &str, args: &[Datum], datum: &Datum) -> Result<Option<Datum>, SprigError> {
    let span = datum.span;
    if let Some(member) = head.strip_prefix('.').filter(|m| !m.is_empty() && !m.starts_with('.')) {
        let (target, rest) = args
            .split_first()
            .ok_or_else(|| datum.syntax_error(format!("Malformed member expression: ({})", head)))?;
        let mut out = vec![sym(".", span), target.clone(), sym(member, span)];
        out.extend(rest.iter().cloned());
        return Ok(Some(list(out, span)));
    }
    if let Some(class) = head.strip_suffix('.').filter(|c| !c.is_empty() && !c.ends_with('.')) {
        let mut out = vec![sym("new", span), sym(class, span)];
        out.extend(args.iter().cloned());
        return Ok(Some(list(out, span)));
    }
    if let (Some(qualifier), member) = split_qualified(head) {
        if state.rt.resolve_class(qualifier).is_some() {
            let mut out = vec![sym(".", span), sym(qualifier, span), sym(member, span)];
            out.extend(args.iter().cloned());
            return Ok(Some(list(out, span)));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_str;
    use crate::runtime::Runtime;

    fn expand(src: &str) -> Result<String, SprigError> {
        let rt = Runtime::new();
        let mut state = CompilerState::new(&rt);
        let datum = read_str(src)?.remove(0);
        Ok(macroexpand(&mut state, &datum)?.0.to_string())
    }

    #[test]
    fn conditionals_become_if() -> Result<(), SprigError> {
        assert_eq!(expand("(when a b c)")?, "(if a (do b c))");
        assert_eq!(expand("(if-not a b c)")?, "(if a c b)");
        assert_eq!(expand("(cond a 1 b 2)")?, "(if a 1 (if b 2 nil))");
        assert_eq!(expand("(cond)")?, "nil");
        Ok(())
    }

    #[test]
    fn cond_needs_pairs() {
        assert!(matches!(expand("(cond a)"), Err(SprigError::Syntax(_))));
    }

    #[test]
    fn threading_rewrites_calls() -> Result<(), SprigError> {
        assert_eq!(expand("(-> x (f 1) g)")?, "(g (f x 1))");
        assert_eq!(expand("(->> x (f 1) g)")?, "(g (f 1 x))");
        Ok(())
    }

    #[test]
    fn defn_drops_the_docstring() -> Result<(), SprigError> {
        assert_eq!(expand("(defn f \"doc\" [x] x)")?, "(def f (fn f [x] x))");
        Ok(())
    }

    #[test]
    fn member_shorthand() -> Result<(), SprigError> {
        assert_eq!(expand("(.length s)")?, "(. s length)");
        assert_eq!(expand("(.-x p)")?, "(. p -x)");
        assert_eq!(expand("(Tuple. 1 2)")?, "(new Tuple 1 2)");
        assert_eq!(expand("(Math/abs -1)")?, "(. Math abs -1)");
        Ok(())
    }

    #[test]
    fn bound_heads_are_left_alone() -> Result<(), SprigError> {
        assert_eq!(expand("(inc 1)")?, "(inc 1)");
        Ok(())
    }
}
