//! Empirical formula in Hill order.

use std::collections::BTreeMap;

/// Hill-order formula: C first, then H, then the rest alphabetically.
/// Without carbon, everything is alphabetical.
pub fn hill_formula<S: AsRef<str>>(elements: &[S]) -> String {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for el in elements {
        *counts.entry(el.as_ref()).or_default() += 1;
    }

    let mut out = String::new();
    let mut push = |symbol: &str, n: usize| {
        out.push_str(symbol);
        if n > 1 {
            out.push_str(&n.to_string());
        }
    };

    if let Some(c) = counts.remove("C") {
        push("C", c);
        if let Some(h) = counts.remove("H") {
            push("H", h);
        }
    }
    for (symbol, n) in counts {
        push(symbol, n);
    }
    out
}
