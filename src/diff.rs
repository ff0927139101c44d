//! Line-based unified diff recorded on revision records. The diff is
//! informational; history reconstruction always uses the full markdown
//! stored per revision.

const CONTEXT: usize = 3;

#[derive(Clone, Copy, PartialEq)]
enum Kind {
    Equal,
    Delete,
    Insert,
}

struct Op<'a> {
    kind: Kind,
    line: &'a str,
}

fn diff_ops<'a>(old: &[&'a str], new: &[&'a str]) -> Vec<Op<'a>> {
    let n = old.len();
    let m = new.len();
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if old[i] == new[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut ops = Vec::with_capacity(n + m);
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            ops.push(Op { kind: Kind::Equal, line: old[i] });
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            ops.push(Op { kind: Kind::Delete, line: old[i] });
            i += 1;
        } else {
            ops.push(Op { kind: Kind::Insert, line: new[j] });
            j += 1;
        }
    }
    for line in &old[i..] {
        ops.push(Op { kind: Kind::Delete, line });
    }
    for line in &new[j..] {
        ops.push(Op { kind: Kind::Insert, line });
    }
    ops
}

/// Unified diff from `old` to `new`, with standard `---`/`+++` headers and
/// hunks carrying three lines of context. Identical inputs yield an empty
/// string.
pub fn unified_diff(old: &str, new: &str, label: &str) -> String {
    if old == new {
        return String::new();
    }

    let old_lines: Vec<&str> = old.lines().collect();
    let new_lines: Vec<&str> = new.lines().collect();
    let ops = diff_ops(&old_lines, &new_lines);

    // Line number (1-based) in old/new at which each op starts.
    let mut old_pos = Vec::with_capacity(ops.len());
    let mut new_pos = Vec::with_capacity(ops.len());
    let (mut o, mut n) = (1usize, 1usize);
    for op in &ops {
        old_pos.push(o);
        new_pos.push(n);
        match op.kind {
            Kind::Equal => {
                o += 1;
                n += 1;
            }
            Kind::Delete => o += 1,
            Kind::Insert => n += 1,
        }
    }

    // Merge changed op ranges whose context windows touch into hunks.
    let changed: Vec<usize> = ops
        .iter()
        .enumerate()
        .filter(|(_, op)| op.kind != Kind::Equal)
        .map(|(idx, _)| idx)
        .collect();
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    for idx in changed {
        match ranges.last_mut() {
            Some((_, end)) if idx <= *end + 2 * CONTEXT + 1 => *end = idx,
            _ => ranges.push((idx, idx)),
        }
    }

    let mut out = String::new();
    out.push_str(&format!("--- a/{}\n", label));
    out.push_str(&format!("+++ b/{}\n", label));

    for (start, end) in ranges {
        let lo = start.saturating_sub(CONTEXT);
        let hi = (end + CONTEXT + 1).min(ops.len());
        let hunk = &ops[lo..hi];

        let old_count = hunk.iter().filter(|op| op.kind != Kind::Insert).count();
        let new_count = hunk.iter().filter(|op| op.kind != Kind::Delete).count();
        let old_start = if old_count == 0 { old_pos[lo].saturating_sub(1) } else { old_pos[lo] };
        let new_start = if new_count == 0 { new_pos[lo].saturating_sub(1) } else { new_pos[lo] };
        out.push_str(&format!(
            "@@ -{},{} +{},{} @@\n",
            old_start, old_count, new_start, new_count
        ));

        for op in hunk {
            let prefix = match op.kind {
                Kind::Equal => ' ',
                Kind::Delete => '-',
                Kind::Insert => '+',
            };
            out.push(prefix);
            out.push_str(op.line);
            out.push('\n');
        }
    }

    out
}
