//! XQuery FLWOR clauses expressed in XPath 3.1
//!
//! XPath 3.1 has `for`, `let` and `if`, but no `where`, `order by` or
//! positional `at` variables, and every clause must end in `return`. This
//! module rewrites a leading FLWOR expression into the equivalent nesting:
//!
//! ```text
//! for $b in //book where $b/price > 30 return $b/title
//! for $b in //book return if ($b/price > 30) then ($b/title) else ()
//! ```
//!
//! Expressions that do not start with `for` or `let` pass through untouched.

/// A top-level token of interest: a bare word or a comma
#[derive(Debug, Clone, Copy, PartialEq)]
enum Mark<'a> {
    Word(usize, &'a str),
    Comma(usize),
}

/// Words and commas outside strings, comments and brackets.
///
/// Names following `$`, `/`, `@` or an axis separator are never keywords and
/// are left out.
fn top_level(text: &str) -> Vec<Mark<'_>> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let ch = |k: usize| chars.get(k).map(|&(_, c)| c);
    let offset = |k: usize| chars.get(k).map_or(text.len(), |&(at, _)| at);

    let mut marks = Vec::new();
    let mut depth = 0usize;
    let mut prev: Option<char> = None;
    let mut i = 0;

    while let Some(c) = ch(i) {
        match c {
            '\'' | '"' => {
                i += 1;
                while let Some(d) = ch(i) {
                    i += 1;
                    if d == c {
                        if ch(i) == Some(c) {
                            i += 1;
                        } else {
                            break;
                        }
                    }
                }
                prev = Some(c);
            }
            '(' if ch(i + 1) == Some(':') => {
                let mut nesting = 0usize;
                loop {
                    match (ch(i), ch(i + 1)) {
                        (Some('('), Some(':')) => {
                            nesting += 1;
                            i += 2;
                        }
                        (Some(':'), Some(')')) => {
                            nesting -= 1;
                            i += 2;
                            if nesting == 0 {
                                break;
                            }
                        }
                        (Some(_), _) => i += 1,
                        (None, _) => break,
                    }
                }
            }
            '(' | '[' | '{' => {
                depth += 1;
                prev = Some(c);
                i += 1;
            }
            ')' | ']' | '}' => {
                depth = depth.saturating_sub(1);
                prev = Some(c);
                i += 1;
            }
            ',' => {
                if depth == 0 {
                    marks.push(Mark::Comma(offset(i)));
                }
                prev = Some(c);
                i += 1;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                i += 1;
                while let Some(d) = ch(i) {
                    if d.is_alphanumeric() || matches!(d, '_' | '-' | '.') {
                        i += 1;
                    } else if d == ':' && ch(i + 1).is_some_and(|e| e.is_alphabetic() || e == '_') {
                        i += 2;
                    } else {
                        break;
                    }
                }
                if depth == 0 && !matches!(prev, Some('$' | '/' | '@' | ':')) {
                    marks.push(Mark::Word(offset(start), &text[offset(start)..offset(i)]));
                }
                prev = Some('a');
            }
            c if c.is_ascii_digit() => {
                while ch(i).is_some_and(|d| d.is_alphanumeric() || d == '.') {
                    i += 1;
                }
                prev = Some('0');
            }
            c if c.is_whitespace() => i += 1,
            _ => {
                prev = Some(c);
                i += 1;
            }
        }
    }

    marks
}

fn words(text: &str) -> Vec<(usize, &str)> {
    top_level(text)
        .into_iter()
        .filter_map(|mark| match mark {
            Mark::Word(at, word) => Some((at, word)),
            Mark::Comma(_) => None,
        })
        .collect()
}

/// Split at top-level commas
fn split_commas(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    for mark in top_level(text) {
        if let Mark::Comma(at) = mark {
            parts.push(text[start..at].trim());
            start = at + 1;
        }
    }
    parts.push(text[start..].trim());
    parts
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ClauseKind {
    For,
    Let,
    Where,
    OrderBy,
}

#[derive(Debug, Clone, Copy)]
struct Clause<'a> {
    kind: ClauseKind,
    body: &'a str,
}

/// One `$var [at $pos] in seq` binding of a `for` clause
#[derive(Debug, PartialEq)]
struct Binding<'a> {
    var: &'a str,
    position: Option<&'a str>,
    sequence: &'a str,
}

fn binding(text: &str) -> Result<Binding<'_>, String> {
    let Some(&(at, _)) = words(text).iter().find(|&&(_, w)| w == "in") else {
        return Err(format!("expected 'in' in for binding '{}'", text));
    };
    let sequence = text[at + 2..].trim();
    let head: Vec<&str> = text[..at].split_whitespace().collect();
    match head[..] {
        [var] => Ok(Binding {
            var,
            position: None,
            sequence,
        }),
        [var, "at", position] => Ok(Binding {
            var,
            position: Some(position),
            sequence,
        }),
        _ => Err(format!("unsupported for binding '{}'", text)),
    }
}

/// Sort keys of an `order by` clause and whether they run descending
fn order_keys(text: &str) -> Result<(String, bool), String> {
    let mut keys = Vec::new();
    let mut descending = None;

    for key in split_commas(text) {
        let mut key = key;
        let mut direction = false;
        if let Some(&(at, word)) = words(key).last() {
            if at + word.len() == key.len() {
                match word {
                    "ascending" => key = key[..at].trim_end(),
                    "descending" => {
                        key = key[..at].trim_end();
                        direction = true;
                    }
                    "greatest" | "least" => {
                        return Err(format!("unsupported order modifier in '{}'", key))
                    }
                    _ => {}
                }
            }
        }
        if *descending.get_or_insert(direction) != direction {
            return Err("mixed ascending and descending order keys are not supported".to_string());
        }
        keys.push(key);
    }

    Ok((keys.join(", "), descending.unwrap_or(false)))
}

/// Rewrite `expression` into plain XPath 3.1
pub fn rewrite(expression: &str) -> Result<String, String> {
    let mut counter = 0;
    rewrite_expr(expression.trim(), &mut counter)
}

fn rewrite_expr(expr: &str, counter: &mut usize) -> Result<String, String> {
    let tokens = words(expr);
    if !matches!(tokens.first(), Some(&(0, "for" | "let"))) {
        return Ok(expr.to_string());
    }
    let Some(ret) = tokens.iter().position(|&(_, w)| w == "return") else {
        return Ok(expr.to_string());
    };
    let ret_at = tokens[ret].0;

    // (keyword start, body start, kind)
    let mut starts: Vec<(usize, usize, ClauseKind)> = Vec::new();
    let mut k = 0;
    while k < ret {
        let (at, word) = tokens[k];
        let ahead = |n: usize| (k + n < ret).then(|| tokens[k + n].1);
        let (one, two) = (ahead(1), ahead(2));
        match word {
            "for" => starts.push((at, at + word.len(), ClauseKind::For)),
            "let" => starts.push((at, at + word.len(), ClauseKind::Let)),
            "where" => starts.push((at, at + word.len(), ClauseKind::Where)),
            "order" if one == Some("by") => {
                starts.push((at, tokens[k + 1].0 + 2, ClauseKind::OrderBy));
                k += 1;
            }
            "stable" if one == Some("order") && two == Some("by") => {
                starts.push((at, tokens[k + 2].0 + 2, ClauseKind::OrderBy));
                k += 2;
            }
            _ => {}
        }
        k += 1;
    }

    let clauses: Vec<Clause<'_>> = starts
        .iter()
        .enumerate()
        .map(|(j, &(_, body, kind))| {
            let end = starts.get(j + 1).map_or(ret_at, |&(next, _, _)| next);
            Clause {
                kind,
                body: expr[body..end].trim(),
            }
        })
        .collect();
    let result = rewrite_expr(expr[ret_at + "return".len()..].trim(), counter)?;

    let plain = match clauses.as_slice() {
        [only] if only.kind == ClauseKind::Let => true,
        [only] if only.kind == ClauseKind::For => split_commas(only.body)
            .into_iter()
            .map(binding)
            .collect::<Result<Vec<_>, _>>()?
            .iter()
            .all(|b| b.position.is_none()),
        _ => false,
    };
    if plain {
        return Ok(format!("{}return {}", &expr[..ret_at], result));
    }

    let mut out = String::new();
    let mut open = 0;
    let order = clauses.iter().position(|c| c.kind == ClauseKind::OrderBy);
    let rest = match order {
        Some(order) => {
            if order + 1 != clauses.len() {
                return Err("order by must be the last clause before return".to_string());
            }
            if clauses[0].kind != ClauseKind::For {
                return Err("order by needs a leading for clause".to_string());
            }
            let bindings = split_commas(clauses[0].body);
            let head = match bindings.as_slice() {
                [single] => binding(single)?,
                _ => return Err("order by over several for bindings is not supported".to_string()),
            };
            if head.position.is_some()
                || clauses[1..order].iter().any(|c| c.kind == ClauseKind::For)
            {
                return Err("order by over several for bindings is not supported".to_string());
            }

            let lets: String = clauses[1..order]
                .iter()
                .filter(|c| c.kind == ClauseKind::Let)
                .map(|c| format!("let {} return ", c.body))
                .collect();
            let (keys, descending) = order_keys(clauses[order].body)?;
            let mut sorted = format!(
                "sort(({}), (), function({}) {{ {}({}) }})",
                head.sequence, head.var, lets, keys
            );
            if descending {
                sorted = format!("reverse({})", sorted);
            }
            out.push_str(&format!("for {} in {} return ", head.var, sorted));
            &clauses[1..order]
        }
        None => &clauses[..],
    };

    for clause in rest {
        match clause.kind {
            ClauseKind::For => {
                for text in split_commas(clause.body) {
                    let b = binding(text)?;
                    match b.position {
                        None => out.push_str(&format!("for {} in {} return ", b.var, b.sequence)),
                        Some(position) => {
                            *counter += 1;
                            let seq = format!("$_at{}", counter);
                            out.push_str(&format!(
                                "let {seq} := ({}) return for {position} in 1 to count({seq}) return let {} := {seq}[{position}] return ",
                                b.sequence, b.var
                            ));
                        }
                    }
                }
            }
            ClauseKind::Let => out.push_str(&format!("let {} return ", clause.body)),
            ClauseKind::Where => {
                out.push_str(&format!("if ({}) then (", clause.body));
                open += 1;
            }
            ClauseKind::OrderBy => {}
        }
    }

    out.push_str(&result);
    for _ in 0..open {
        out.push_str(") else ()");
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_plain_expressions_untouched() {
        for expr in [
            "//book[price > 30]",
            "for $b in //book return $b",
            "let $b := //book return $b",
            "for $w in //where return $w",
            "count(//book) - 1",
        ] {
            assert_eq!(rewrite(expr).unwrap(), expr);
        }
    }

    #[test]
    fn test_where_becomes_conditional() {
        assert_eq!(
            rewrite("for $b in //book where $b/price > 30 return $b/title").unwrap(),
            "for $b in //book return if ($b/price > 30) then ($b/title) else ()"
        );
    }

    #[test]
    fn test_clauses_chain_with_return() {
        assert_eq!(
            rewrite("for $b in //book let $p := $b/price where $p > 20 return $b").unwrap(),
            "for $b in //book return let $p := $b/price return if ($p > 20) then ($b) else ()"
        );
        assert_eq!(
            rewrite("for $a in //a, $b in $a/b return $b").unwrap(),
            "for $a in //a, $b in $a/b return $b"
        );
        assert_eq!(
            rewrite("for $a in //a for $b in $a/b return $b").unwrap(),
            "for $a in //a return for $b in $a/b return $b"
        );
    }

    #[test]
    fn test_keywords_inside_literals_and_paths() {
        assert_eq!(
            rewrite("for $b in //book where $b/where = 'order by where' return $b").unwrap(),
            "for $b in //book return if ($b/where = 'order by where') then ($b) else ()"
        );
        assert_eq!(
            rewrite("for $b in //book (: where :) return $b").unwrap(),
            "for $b in //book (: where :) return $b"
        );
    }

    #[test]
    fn test_positional_variable() {
        assert_eq!(
            rewrite("for $b at $i in //book where $i > 1 return $b").unwrap(),
            "let $_at1 := (//book) return for $i in 1 to count($_at1) return let $b := $_at1[$i] return if ($i > 1) then ($b) else ()"
        );
    }

    #[test]
    fn test_order_by() {
        assert_eq!(
            rewrite("for $b in //book order by $b/price descending return $b/title").unwrap(),
            "for $b in reverse(sort((//book), (), function($b) { ($b/price) })) return $b/title"
        );
        assert_eq!(
            rewrite("for $b in //book let $t := $b/title where $t != 'A' stable order by $t return $b")
                .unwrap(),
            "for $b in sort((//book), (), function($b) { let $t := $b/title return ($t) }) return let $t := $b/title return if ($t != 'A') then ($b) else ()"
        );
    }

    #[test]
    fn test_nested_flwor_in_return() {
        assert_eq!(
            rewrite("for $a in //a return for $b in $a/b where $b/@x return $b").unwrap(),
            "for $a in //a return for $b in $a/b return if ($b/@x) then ($b) else ()"
        );
    }

    #[test]
    fn test_unsupported_order_by() {
        assert!(rewrite("for $a in //a, $b in //b order by $b return $a").is_err());
        assert!(rewrite("for $a in //a order by $a ascending, $a/@n descending return $a").is_err());
        assert!(rewrite("for $a in //a order by $a empty greatest return $a").is_err());
    }
}
