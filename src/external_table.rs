//! External pointer table: a text-format mapping from function name to a
//! list of effects, consulted by the call transfer function for functions
//! with no IR body.
//!
//! A line-oriented, `#`-comment format with a small effect grammar of its
//! own; a missing or unreadable table is logged and treated as empty
//! rather than failing the analysis, since most modules have no external
//! table at all and should still analyze (conservatively) without one.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::warn;

/// `argN` or the call's return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgOrRet {
    Arg(u32),
    Ret,
}

/// A source or destination operand in a `COPY` effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// The pointer value itself (an SSA value, `Env`-typed).
    Value(ArgOrRet),
    /// The memory object the pointer directly points to (`Store`-typed).
    Memory(ArgOrRet),
    /// Every pointer-typed sub-object reachable from this argument's
    /// pointee, recursively -- only valid for `argN`.
    Reachable(u32),
    /// Source-only: the Universal object.
    Universal,
    /// Source-only: the null pointer.
    Null,
    /// Source-only: a fresh, analysis-internal static object (distinct per
    /// call site, not reachable from anywhere else).
    Static,
}

impl Operand {
    /// `dst` only accepts `Value`/`Memory`/`Reachable`: a store destination
    /// can't be the Universal or Null object, or a fresh static one.
    fn valid_as_dst(&self) -> bool {
        !matches!(self, Operand::Universal | Operand::Null | Operand::Static)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Alloc { size_arg: Option<u32> },
    Copy { src: Operand, dst: Operand },
    Exit,
}

/// Effects registered for one function name, in the order they appear on
/// its line.
pub type EffectList = Vec<Effect>;

#[derive(Debug, Clone, Default)]
pub struct ExternalTable {
    entries: BTreeMap<String, EffectList>,
}

impl ExternalTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load from disk. A missing or unreadable file is logged and treated
    /// as an empty table.
    pub fn load_file(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents),
            Err(e) => {
                warn!("external pointer table {} unreadable ({e}); proceeding as if empty", path.display());
                Self::empty()
            }
        }
    }

    /// Parse from an in-memory string. Malformed lines are logged and
    /// skipped; the rest of the table still loads.
    pub fn parse(contents: &str) -> Self {
        let mut entries = BTreeMap::new();
        for (lineno, raw) in contents.lines().enumerate() {
            let line = strip_comment(raw).trim();
            if line.is_empty() {
                continue;
            }
            match parse_line(line) {
                Ok((name, effects)) => {
                    entries.insert(name, effects);
                }
                Err(msg) => warn!("external pointer table line {}: {msg} (ignored)", lineno + 1),
            }
        }
        ExternalTable { entries }
    }

    /// Lookup by function name, demangled or mangled as produced by the
    /// IR. Absence of an entry is a recognized, non-error state: the
    /// caller treats it as an unannotated external.
    pub fn lookup(&self, name: &str) -> Option<&[Effect]> {
        self.entries.get(name).map(Vec::as_slice)
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn parse_line(line: &str) -> Result<(String, EffectList), String> {
    let mut parts = line.splitn(2, char::is_whitespace);
    let name = parts.next().filter(|s| !s.is_empty()).ok_or("missing function name")?;
    let rest = parts.next().unwrap_or("").trim();
    if rest.is_empty() {
        return Err(format!("no effects for '{name}'"));
    }
    let effects = rest.split(';').map(str::trim).filter(|s| !s.is_empty()).map(parse_effect).collect::<Result<Vec<_>, _>>()?;
    Ok((name.to_string(), effects))
}

fn parse_effect(text: &str) -> Result<Effect, String> {
    let lower = text.to_ascii_lowercase();
    if lower == "exit" {
        return Ok(Effect::Exit);
    }
    if let Some(rest) = case_insensitive_strip_prefix(text, "alloc") {
        let rest = rest.trim();
        if rest.is_empty() {
            return Ok(Effect::Alloc { size_arg: None });
        }
        let kv = parse_kv(rest)?;
        if kv.0 != "size" {
            return Err(format!("ALLOC takes 'size=argN', got '{rest}'"));
        }
        let arg = parse_arg_index(&kv.1)?;
        return Ok(Effect::Alloc { size_arg: Some(arg) });
    }
    if let Some(rest) = case_insensitive_strip_prefix(text, "copy") {
        let mut src = None;
        let mut dst = None;
        for token in rest.split_whitespace() {
            let (key, val) = parse_kv(token)?;
            match key.as_str() {
                "src" => src = Some(parse_operand(&val)?),
                "dst" => dst = Some(parse_operand(&val)?),
                other => return Err(format!("unknown COPY key '{other}'")),
            }
        }
        let src = src.ok_or("COPY missing src=")?;
        let dst = dst.ok_or("COPY missing dst=")?;
        if !dst.valid_as_dst() {
            return Err(format!("{dst:?} is not a valid COPY destination"));
        }
        return Ok(Effect::Copy { src, dst });
    }
    Err(format!("unrecognized effect '{text}'"))
}

fn case_insensitive_strip_prefix<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    if text.len() >= prefix.len() && text[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&text[prefix.len()..])
    } else {
        None
    }
}

fn parse_kv(token: &str) -> Result<(String, String), String> {
    let (k, v) = token.split_once('=').ok_or_else(|| format!("expected key=value, got '{token}'"))?;
    Ok((k.trim().to_ascii_lowercase(), v.trim().to_string()))
}

fn parse_arg_index(val: &str) -> Result<u32, String> {
    let val = val.to_ascii_lowercase();
    let digits = val.strip_prefix("arg").ok_or_else(|| format!("expected 'argN', got '{val}'"))?;
    digits.parse::<u32>().map_err(|_| format!("expected 'argN', got '{val}'"))
}

fn parse_arg_or_ret(val: &str) -> Result<ArgOrRet, String> {
    if val.eq_ignore_ascii_case("ret") {
        return Ok(ArgOrRet::Ret);
    }
    parse_arg_index(val).map(ArgOrRet::Arg)
}

fn parse_operand(val: &str) -> Result<Operand, String> {
    let lower = val.to_ascii_lowercase();
    if lower == "universal" {
        return Ok(Operand::Universal);
    }
    if lower == "null" {
        return Ok(Operand::Null);
    }
    if lower == "static" {
        return Ok(Operand::Static);
    }
    if let Some(inner) = paren_contents(val, "value") {
        return Ok(Operand::Value(parse_arg_or_ret(inner)?));
    }
    if let Some(inner) = paren_contents(val, "memory") {
        return Ok(Operand::Memory(parse_arg_or_ret(inner)?));
    }
    if let Some(inner) = paren_contents(val, "reachable") {
        return Ok(Operand::Reachable(parse_arg_index(inner)?));
    }
    Err(format!("unrecognized operand '{val}'"))
}

fn paren_contents<'a>(val: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = case_insensitive_strip_prefix(val, keyword)?;
    let rest = rest.strip_prefix('(')?;
    rest.strip_suffix(')')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_alloc_copy_and_exit() {
        let table = ExternalTable::parse(
            "\
            # comment line\n\
            malloc ALLOC size=arg0\n\
            memcpy COPY src=reachable(arg1) dst=reachable(arg0)\n\
            free EXIT\n\
            strdup ALLOC; COPY src=reachable(arg0) dst=value(ret)\n\
            ",
        );
        assert_eq!(table.lookup("malloc"), Some(&[Effect::Alloc { size_arg: Some(0) }][..]));
        assert_eq!(
            table.lookup("memcpy"),
            Some(&[Effect::Copy { src: Operand::Reachable(1), dst: Operand::Reachable(0) }][..])
        );
        assert_eq!(table.lookup("free"), Some(&[Effect::Exit][..]));
        assert_eq!(
            table.lookup("strdup"),
            Some(
                &[
                    Effect::Alloc { size_arg: None },
                    Effect::Copy { src: Operand::Reachable(0), dst: Operand::Value(ArgOrRet::Ret) },
                ][..]
            )
        );
    }

    #[test]
    fn universal_null_static_sources() {
        let table = ExternalTable::parse("getenv COPY src=universal dst=value(ret)\nmemset COPY src=null dst=memory(arg0)\nfopen COPY src=static dst=value(ret)\n");
        assert_eq!(table.lookup("getenv"), Some(&[Effect::Copy { src: Operand::Universal, dst: Operand::Value(ArgOrRet::Ret) }][..]));
        assert_eq!(table.lookup("memset"), Some(&[Effect::Copy { src: Operand::Null, dst: Operand::Memory(ArgOrRet::Arg(0)) }][..]));
        assert_eq!(table.lookup("fopen"), Some(&[Effect::Copy { src: Operand::Static, dst: Operand::Value(ArgOrRet::Ret) }][..]));
    }

    #[test]
    fn rejects_universal_as_dst() {
        let table = ExternalTable::parse("bogus COPY src=value(arg0) dst=universal\n");
        assert!(table.lookup("bogus").is_none());
    }

    #[test]
    fn absent_entry_is_none() {
        let table = ExternalTable::empty();
        assert!(table.lookup("unannotated_fn").is_none());
    }

    #[test]
    fn missing_file_yields_empty_table() {
        let table = ExternalTable::load_file(Path::new("/nonexistent/does/not/exist.table"));
        assert!(table.lookup("anything").is_none());
    }
}
