//! Demangler helpers for C++ (Itanium) and Rust symbols.
//!
//! Module symbol tables are mostly Itanium-mangled C++; Rust names show up
//! in homebrew modules. Anything else is shown verbatim.

use once_cell::sync::Lazy;
use regex::Regex;

static RE_ITA_MANGLED: Lazy<Regex> = Lazy::new(|| {
    // Itanium (GCC/Clang) ABI: _Z...
    Regex::new(r#"^_Z[a-zA-Z0-9_][a-zA-Z0-9_.$]*$"#).expect("valid itanium mangled regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolFlavor {
    Itanium,
    Rust,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemangleResult {
    pub original: String,
    pub demangled: String,
    pub flavor: SymbolFlavor,
}

/// Rust v0 symbols, or legacy ones carrying the trailing `h<hash>` element.
/// Plain `_ZN...E` names are left to the C++ demangler.
fn rust_demangle(s: &str) -> Option<String> {
    let dm = rustc_demangle::try_demangle(s).ok()?;
    let full = dm.to_string();
    let short = format!("{:#}", dm);
    if s.starts_with("_R") || full != short {
        Some(short)
    } else {
        None
    }
}

pub fn detect_flavor(s: &str) -> SymbolFlavor {
    if rust_demangle(s).is_some() {
        return SymbolFlavor::Rust;
    }
    if RE_ITA_MANGLED.is_match(s) && cpp_demangle::Symbol::new(s).is_ok() {
        return SymbolFlavor::Itanium;
    }
    SymbolFlavor::Unknown
}

/// Attempt to demangle a single symbol. Returns None when not recognized.
pub fn demangle_one(s: &str) -> Option<DemangleResult> {
    if let Some(demangled) = rust_demangle(s) {
        return Some(DemangleResult {
            original: s.to_string(),
            demangled,
            flavor: SymbolFlavor::Rust,
        });
    }
    if RE_ITA_MANGLED.is_match(s) {
        if let Ok(sym) = cpp_demangle::Symbol::new(s) {
            return Some(DemangleResult {
                original: s.to_string(),
                demangled: sym.to_string(),
                flavor: SymbolFlavor::Itanium,
            });
        }
    }
    None
}

/// Name shown for a raw symbol-table string: the demangled form when one
/// exists, the raw name otherwise, and nothing for an empty name.
pub fn display_name(raw: &str) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    Some(match demangle_one(raw) {
        Some(r) => r.demangled,
        None => raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_flavor_simple() {
        assert_eq!(detect_flavor("_Z3foov"), SymbolFlavor::Itanium);
        assert_eq!(detect_flavor("_ZN3foo3barE"), SymbolFlavor::Itanium);
        assert_eq!(detect_flavor("main"), SymbolFlavor::Unknown);
        assert_eq!(
            detect_flavor("_ZN4core3fmt5write17h0123456789abcdefE"),
            SymbolFlavor::Rust
        );
    }

    #[test]
    fn demangles_itanium() {
        let r = demangle_one("_ZN2nn2sf4impl6detail8ObjectIdEv").unwrap();
        assert_eq!(r.flavor, SymbolFlavor::Itanium);
        assert!(r.demangled.starts_with("nn::sf::impl::detail::ObjectId"));
        let vt = demangle_one("_ZTVN3foo4IBarE").unwrap();
        assert_eq!(vt.demangled, "vtable for foo::IBar");
    }

    #[test]
    fn display_name_rules() {
        assert_eq!(display_name(""), None);
        assert_eq!(display_name("main").as_deref(), Some("main"));
        assert_eq!(display_name("_Z3foov").as_deref(), Some("foo()"));
    }
}
