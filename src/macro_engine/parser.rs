//! The Macro Parser (component E, spec.md §4.2 "Syntactic layer"): turns
//! lexed source text into a `Program` (a `Task` tree), or a `ParseError`
//! naming the offending token.
//!
//! Grammar (spec.md §4.2):
//! ```text
//! program := call ('.' call)*
//! call    := name '(' args? ')'
//! args    := arg (',' arg)*
//! arg     := name '=' expr | expr
//! expr    := literal | name | quoted_string | '$' name | call
//! ```

use super::ast::{Axis, KeyEdge, Program, Task};
use super::lexer::{count_brackets, extract_args, handle_plus_syntax, split_keyword_arg, strip_comments, strip_whitespace};
use super::value::{validate_variable_name, TypeTag, Variable};
use crate::error::ParseError;

/// Parse macro source text into a `Program`. Comments and insignificant
/// whitespace are stripped first; a bare `+`-chain at the top level is
/// rewritten to `hold_keys(...)` before the call grammar is applied
/// (spec.md §4.2, I4).
pub fn parse(source: &str) -> Result<Program, ParseError> {
    let cleaned = strip_whitespace(&strip_comments(source));
    if cleaned.is_empty() {
        return Ok(Program::empty());
    }
    let rewritten = handle_plus_syntax(&cleaned)?;
    parse_program(&rewritten)
}

/// `call ('.' call)*` — each `.`-joined call becomes one task, executed in
/// order.
fn parse_program(source: &str) -> Result<Program, ParseError> {
    if source.is_empty() {
        return Ok(Program::empty());
    }
    let calls = split_top_level_dots(source);
    let tasks = calls.iter().map(|c| parse_call(c)).collect::<Result<Vec<_>, _>>()?;
    Ok(Program::new(tasks))
}

/// Split on a top-level `.` — not one inside parens or quotes. `lexer`'s
/// `split_top_level` is private to comma/plus splitting; this mirrors it
/// for `.` since task chaining uses the same depth/quote bookkeeping.
fn split_top_level_dots(source: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut in_quote = false;

    for c in source.chars() {
        match c {
            '"' => {
                in_quote = !in_quote;
                current.push(c);
            }
            '(' if !in_quote => {
                depth += 1;
                current.push(c);
            }
            ')' if !in_quote => {
                depth -= 1;
                current.push(c);
            }
            '.' if !in_quote && depth == 0 => {
                pieces.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    pieces.push(current);
    pieces
}

fn parse_call(source: &str) -> Result<Task, ParseError> {
    let open = source.find('(').ok_or_else(|| ParseError::ExpectedBracket(source.to_string()))?;
    let name = source[..open].trim().to_lowercase();
    if name.is_empty() {
        return Err(ParseError::ExpectedBracket(source.to_string()));
    }

    let relative_close = count_brackets(&source[open..]);
    if relative_close == 0 {
        return Err(ParseError::UnbalancedBrackets(source.to_string()));
    }
    let close = open + relative_close;
    if close != source.len() {
        return Err(ParseError::UnbalancedBrackets(source.to_string()));
    }

    let inner = &source[open + 1..close - 1];
    let raw_args: Vec<String> = if inner.trim().is_empty() { Vec::new() } else { extract_args(inner) };

    build_task(&name, raw_args)
}

/// A raw argument, positional or `name=expr`, bound to its slot.
struct Slots {
    task: String,
    values: Vec<Option<String>>,
    names: &'static [&'static str],
}

impl Slots {
    fn bind(task: &str, raw_args: Vec<String>, names: &'static [&'static str], min: usize, max: usize) -> Result<Self, ParseError> {
        let mut values: Vec<Option<String>> = vec![None; names.len()];
        let mut next_positional = 0usize;

        for raw in raw_args {
            match split_keyword_arg(&raw) {
                Some((kw, expr)) if names.contains(&kw.as_str()) => {
                    let idx = names.iter().position(|n| *n == kw).unwrap();
                    if values[idx].is_some() {
                        return Err(ParseError::KeywordCollision { task: task.to_string(), name: kw });
                    }
                    values[idx] = Some(expr);
                }
                Some((kw, _)) => {
                    return Err(ParseError::UnknownKeyword { task: task.to_string(), name: kw });
                }
                None => {
                    if next_positional >= names.len() {
                        return Err(ParseError::WrongArity {
                            task: task.to_string(),
                            min,
                            max,
                            got: next_positional + 1,
                        });
                    }
                    if values[next_positional].is_some() {
                        return Err(ParseError::KeywordCollision {
                            task: task.to_string(),
                            name: names[next_positional].to_string(),
                        });
                    }
                    values[next_positional] = Some(raw);
                    next_positional += 1;
                }
            }
        }

        let got = values.iter().filter(|v| v.is_some()).count();
        if got < min || got > max {
            return Err(ParseError::WrongArity { task: task.to_string(), min, max, got });
        }

        Ok(Slots { task: task.to_string(), values, names })
    }

    fn required(&self, name: &str) -> Result<&str, ParseError> {
        let idx = self.names.iter().position(|n| *n == name).unwrap();
        self.values[idx].as_deref().ok_or_else(|| ParseError::WrongArity {
            task: self.task.clone(),
            min: 0,
            max: self.names.len(),
            got: 0,
        })
    }

    fn optional(&self, name: &str) -> Option<&str> {
        let idx = self.names.iter().position(|n| *n == name).unwrap();
        self.values[idx].as_deref()
    }
}

/// Parse one expr slot as a `Variable`. Quoted strings are always strings;
/// `$name` is a dynamic reference; anything else runs the
/// int-then-float-then-string cascade.
fn parse_variable(expr: &str) -> Result<Variable, ParseError> {
    let expr = expr.trim();
    if let Some(stripped) = expr.strip_prefix('$') {
        if stripped.is_empty() {
            return Err(ParseError::InvalidVariableName(expr.to_string()));
        }
        return Ok(Variable::dynamic(stripped.to_lowercase()));
    }
    if expr.len() >= 2 && expr.starts_with('"') && expr.ends_with('"') {
        return Ok(Variable::quoted_string(expr[1..expr.len() - 1].to_string()));
    }
    Ok(Variable::unquoted(expr))
}

/// Type-check a constant argument against its slot's accepted types right
/// now, at parse time; dynamic (`$name`) arguments are checked later, when
/// the task actually runs (spec.md §4.2).
fn check_constant_type(task: &str, index: usize, variable: &Variable, accepted: &[TypeTag]) -> Result<(), ParseError> {
    let Variable::Const { value, forced_string } = variable else {
        return Ok(());
    };
    let store = super::store::VariableStore::new();
    let probe = if *forced_string {
        Variable::Const { value: value.clone(), forced_string: true }
    } else {
        variable.clone()
    };
    probe.resolve(&store, task, accepted).map(|_| ()).map_err(|_| ParseError::TypeMismatch {
        task: task.to_string(),
        index,
        found: value.type_name(),
        expected: "see task signature",
    })
}

fn parse_symbol_variable(task: &str, index: usize, expr: &str) -> Result<Variable, ParseError> {
    let v = parse_variable(expr)?;
    check_constant_type(task, index, &v, &[TypeTag::Str])?;
    Ok(v)
}

fn parse_program_slot(expr: Option<&str>) -> Result<Option<Program>, ParseError> {
    match expr {
        None => Ok(None),
        Some(e) if e.is_empty() => Ok(None),
        Some(e) => Ok(Some(parse_program(e)?)),
    }
}

fn parse_axis(task: &str, expr: &str) -> Result<Axis, ParseError> {
    match expr.trim().trim_matches('"').to_lowercase().as_str() {
        "up" => Ok(Axis::Up),
        "down" => Ok(Axis::Down),
        "left" => Ok(Axis::Left),
        "right" => Ok(Axis::Right),
        _ => Err(ParseError::TypeMismatch {
            task: task.to_string(),
            index: 0,
            found: "str",
            expected: "one of up, down, left, right",
        }),
    }
}

/// One-letter aliases for the most frequently typed tasks (original
/// `tests/unit/test_macros.py`: `k(1).h(k(a)).k(3)`, `r(1, macro=k(1))`,
/// `w(2)`, `e(EV_KEY, KEY_A, 1)`). Resolved to the canonical name before
/// dispatch so every other error message still names the task in full.
fn resolve_task_alias(name: &str) -> &str {
    match name {
        "k" => "key",
        "w" => "wait",
        "e" => "event",
        "r" => "repeat",
        "m" => "modify",
        "h" => "hold",
        other => other,
    }
}

fn build_task(name: &str, raw_args: Vec<String>) -> Result<Task, ParseError> {
    let name = resolve_task_alias(name);
    match name {
        "key" | "key_down" | "key_up" => {
            let slots = Slots::bind(name, raw_args, &["symbol"], 1, 1)?;
            let symbol = parse_symbol_variable(name, 0, slots.required("symbol")?)?;
            let edge = match name {
                "key" => KeyEdge::Tap,
                "key_down" => KeyEdge::Down,
                _ => KeyEdge::Up,
            };
            Ok(Task::Key { symbol, edge })
        }

        "hold" => {
            let slots = Slots::bind(name, raw_args, &["macro"], 0, 1)?;
            let child = parse_program_slot(slots.optional("macro"))?;
            Ok(Task::Hold { child })
        }

        "hold_keys" => {
            let symbols = raw_args
                .iter()
                .enumerate()
                .map(|(i, raw)| parse_symbol_variable("hold_keys", i, raw))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Task::HoldKeys { symbols })
        }

        "modify" => {
            let slots = Slots::bind(name, raw_args, &["symbol", "macro"], 2, 2)?;
            let symbol = parse_symbol_variable(name, 0, slots.required("symbol")?)?;
            let child = parse_program(slots.required("macro")?)?;
            Ok(Task::Modify { symbol, child })
        }

        "repeat" => {
            let slots = Slots::bind(name, raw_args, &["count", "macro"], 2, 2)?;
            let count = parse_variable(slots.required("count")?)?;
            check_constant_type(name, 0, &count, &[TypeTag::Int])?;
            let child = parse_program(slots.required("macro")?)?;
            Ok(Task::Repeat { count, child })
        }

        "wait" => {
            let slots = Slots::bind(name, raw_args, &["min", "max"], 1, 2)?;
            let min_ms = parse_variable(slots.required("min")?)?;
            check_constant_type(name, 0, &min_ms, &[TypeTag::Int, TypeTag::Float])?;
            let max_ms = match slots.optional("max") {
                Some(raw) => {
                    let v = parse_variable(raw)?;
                    check_constant_type(name, 1, &v, &[TypeTag::Int, TypeTag::Float])?;
                    Some(v)
                }
                None => None,
            };
            Ok(Task::Wait { min_ms, max_ms })
        }

        "mouse" => {
            let slots = Slots::bind(name, raw_args, &["direction", "speed", "accel"], 2, 3)?;
            let axis = parse_axis(name, slots.required("direction")?)?;
            let speed = parse_variable(slots.required("speed")?)?;
            check_constant_type(name, 1, &speed, &[TypeTag::Int, TypeTag::Float])?;
            let accel = match slots.optional("accel") {
                Some(raw) => {
                    let v = parse_variable(raw)?;
                    check_constant_type(name, 2, &v, &[TypeTag::Int, TypeTag::Float])?;
                    Some(v)
                }
                None => None,
            };
            Ok(Task::Mouse { axis, speed, accel })
        }

        "wheel" => {
            let slots = Slots::bind(name, raw_args, &["direction", "speed"], 2, 2)?;
            let axis = parse_axis(name, slots.required("direction")?)?;
            let speed = parse_variable(slots.required("speed")?)?;
            check_constant_type(name, 1, &speed, &[TypeTag::Int, TypeTag::Float])?;
            Ok(Task::Wheel { axis, speed })
        }

        "event" => {
            let slots = Slots::bind(name, raw_args, &["type", "code", "value"], 3, 3)?;
            let event_type = parse_variable(slots.required("type")?)?;
            let code = parse_variable(slots.required("code")?)?;
            let value = parse_variable(slots.required("value")?)?;
            check_constant_type(name, 0, &event_type, &[TypeTag::Int])?;
            check_constant_type(name, 1, &code, &[TypeTag::Int])?;
            check_constant_type(name, 2, &value, &[TypeTag::Int])?;
            Ok(Task::Event { event_type, code, value })
        }

        "set" => {
            let slots = Slots::bind(name, raw_args, &["name", "value"], 2, 2)?;
            let var_name = slots.required("name")?.trim().to_lowercase();
            validate_variable_name(&var_name)?;
            let value = parse_variable(slots.required("value")?)?;
            Ok(Task::Set { name: var_name, value })
        }

        "add" => {
            let slots = Slots::bind(name, raw_args, &["name", "number"], 2, 2)?;
            let var_name = slots.required("name")?.trim().to_lowercase();
            validate_variable_name(&var_name)?;
            let amount = parse_variable(slots.required("number")?)?;
            check_constant_type(name, 1, &amount, &[TypeTag::Int, TypeTag::Float])?;
            Ok(Task::Add { name: var_name, amount })
        }

        "if_eq" => {
            let slots = Slots::bind(name, raw_args, &["a", "b", "then", "else"], 2, 4)?;
            let a = parse_variable(slots.required("a")?)?;
            let b = parse_variable(slots.required("b")?)?;
            let then = parse_program_slot(slots.optional("then"))?;
            let els = parse_program_slot(slots.optional("else"))?;
            Ok(Task::IfEq { a, b, then, els })
        }

        "ifeq" => {
            let slots = Slots::bind(name, raw_args, &["name", "value", "then", "else"], 2, 4)?;
            let var_name = slots.required("name")?.trim().to_lowercase();
            validate_variable_name(&var_name)?;
            let value = parse_variable(slots.required("value")?)?;
            let then = parse_program_slot(slots.optional("then"))?;
            let els = parse_program_slot(slots.optional("else"))?;
            Ok(Task::IfEqName { name: var_name, value, then, els })
        }

        "if_tap" => {
            let slots = Slots::bind(name, raw_args, &["then", "else", "timeout"], 0, 3)?;
            let then = parse_program_slot(slots.optional("then"))?;
            let els = parse_program_slot(slots.optional("else"))?;
            let timeout_ms = match slots.optional("timeout") {
                Some(raw) => parse_variable(raw)?,
                None => Variable::constant(super::value::Value::Int(300)),
            };
            Ok(Task::IfTap { then, els, timeout_ms })
        }

        "if_single" => {
            let slots = Slots::bind(name, raw_args, &["then", "else", "timeout"], 0, 3)?;
            let then = parse_program_slot(slots.optional("then"))?;
            let els = parse_program_slot(slots.optional("else"))?;
            let timeout_ms = match slots.optional("timeout") {
                Some(raw) => Some(parse_variable(raw)?),
                None => None,
            };
            Ok(Task::IfSingle { then, els, timeout_ms })
        }

        "if_capslock" => {
            let slots = Slots::bind(name, raw_args, &["then", "else"], 0, 2)?;
            let then = parse_program_slot(slots.optional("then"))?;
            let els = parse_program_slot(slots.optional("else"))?;
            Ok(Task::IfCapsLock { then, els })
        }

        "if_numlock" => {
            let slots = Slots::bind(name, raw_args, &["then", "else"], 0, 2)?;
            let then = parse_program_slot(slots.optional("then"))?;
            let els = parse_program_slot(slots.optional("else"))?;
            Ok(Task::IfNumLock { then, els })
        }

        other => Err(ParseError::UnknownTask(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plus_syntax_round_trips_to_hold_keys() {
        let program = parse("a + b + c").unwrap();
        assert_eq!(program.tasks.len(), 1);
        assert!(matches!(&program.tasks[0], Task::HoldKeys { symbols } if symbols.len() == 3));
    }

    #[test]
    fn chained_calls_become_sequential_tasks() {
        let program = parse("key(a).key(b)").unwrap();
        assert_eq!(program.tasks.len(), 2);
    }

    #[test]
    fn unknown_task_is_an_error() {
        assert!(matches!(parse("bogus(a)"), Err(ParseError::UnknownTask(_))));
    }

    #[test]
    fn wrong_arity_is_an_error() {
        assert!(matches!(parse("key(a,b)"), Err(ParseError::WrongArity { .. })));
        assert!(matches!(parse("key()"), Err(ParseError::WrongArity { .. })));
    }

    #[test]
    fn unbalanced_brackets_is_an_error() {
        assert!(matches!(parse("key(a"), Err(ParseError::UnbalancedBrackets(_))));
    }

    #[test]
    fn unknown_keyword_names_the_offender() {
        match parse("if_tap(then=key(a), bogus=5)") {
            Err(ParseError::UnknownKeyword { name, .. }) => assert_eq!(name, "bogus"),
            other => panic!("expected UnknownKeyword, got {other:?}"),
        }
    }

    #[test]
    fn keyword_and_positional_collision_is_an_error() {
        assert!(matches!(
            parse("modify(a, macro=key(b), symbol=a)"),
            Err(ParseError::KeywordCollision { .. })
        ));
    }

    #[test]
    fn dynamic_variable_is_not_type_checked_until_runtime() {
        // $count as a repeat() count is accepted at parse time even though
        // its eventual runtime value is unknown here.
        let program = parse("repeat($count, key(a))").unwrap();
        assert!(matches!(&program.tasks[0], Task::Repeat { .. }));
    }

    #[test]
    fn legacy_ifeq_binds_a_bare_name() {
        let program = parse("ifeq(foo, 3, key(a), key(b))").unwrap();
        assert!(matches!(&program.tasks[0], Task::IfEqName { name, .. } if name == "foo"));
    }
}
