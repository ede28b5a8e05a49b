//! Non-uniform line height index with O(log n) coordinate queries.
//!
//! Scrollbar math and vertical hit testing need `line -> y` and `y -> line`
//! without summing every line height. The index stores one height per buffer
//! line in a balanced tree keyed by position, maintaining subtree line counts
//! and height sums so both queries are a single root-to-leaf descent. Line
//! insertion and removal splice subtrees instead of shifting an array.
//!
//! Lines hidden inside a collapsed fold carry height `0.0`, so a y coordinate
//! falling on a collapsed region resolves to the fold's visible start line.
//!
//! The tree is a treap with deterministic pseudo-random priorities, giving
//! expected O(log n) depth without rebalancing bookkeeping.

/// One treap node: a single line's height plus subtree aggregates.
struct Node {
    left: Option<Box<Node>>,
    right: Option<Box<Node>>,
    priority: u64,
    /// This line's height in pixels.
    height: f64,
    /// Number of lines in this subtree (including self).
    count: usize,
    /// Sum of heights in this subtree.
    total: f64,
}

impl Node {
    fn leaf(height: f64, priority: u64) -> Box<Node> {
        Box::new(Node {
            left: None,
            right: None,
            priority,
            height,
            count: 1,
            total: height,
        })
    }

    fn update(&mut self) {
        self.count = 1 + count(&self.left) + count(&self.right);
        self.total = self.height + total(&self.left) + total(&self.right);
    }
}

fn count(node: &Option<Box<Node>>) -> usize {
    node.as_ref().map(|n| n.count).unwrap_or(0)
}

fn total(node: &Option<Box<Node>>) -> f64 {
    node.as_ref().map(|n| n.total).unwrap_or(0.0)
}

/// Split `node` into (first `at` lines, rest).
fn split(node: Option<Box<Node>>, at: usize) -> (Option<Box<Node>>, Option<Box<Node>>) {
    let Some(mut node) = node else {
        return (None, None);
    };
    let left_count = count(&node.left);
    if at <= left_count {
        let (a, b) = split(node.left.take(), at);
        node.left = b;
        node.update();
        (a, Some(node))
    } else {
        let (a, b) = split(node.right.take(), at - left_count - 1);
        node.right = a;
        node.update();
        (Some(node), b)
    }
}

fn merge(a: Option<Box<Node>>, b: Option<Box<Node>>) -> Option<Box<Node>> {
    match (a, b) {
        (None, b) => b,
        (a, None) => a,
        (Some(mut a), Some(mut b)) => {
            if a.priority >= b.priority {
                a.right = merge(a.right.take(), Some(b));
                a.update();
                Some(a)
            } else {
                b.left = merge(Some(a), b.left.take());
                b.update();
                Some(b)
            }
        }
    }
}

/// Overwrite the height of the line at 0-based `target`, refreshing
/// aggregates on the way back up.
fn set_at(node: &mut Option<Box<Node>>, target: usize, height: f64) {
    if let Some(n) = node {
        let left_count = count(&n.left);
        if target < left_count {
            set_at(&mut n.left, target, height);
        } else if target == left_count {
            n.height = height;
        } else {
            set_at(&mut n.right, target - left_count - 1, height);
        }
        n.update();
    }
}

/// splitmix64. Deterministic priorities keep tests reproducible.
fn splitmix(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Positional index of per-line pixel heights.
///
/// Line numbers are 1-based, matching the buffer. Every buffer line has an
/// entry; unmeasured lines use the default height.
pub struct HeightIndex {
    root: Option<Box<Node>>,
    default_height: f64,
    seed: u64,
}

impl HeightIndex {
    /// Create an index of `line_count` lines, all at `default_height`.
    pub fn new(default_height: f64, line_count: usize) -> Self {
        let mut index = Self {
            root: None,
            default_height,
            seed: 0x5EED_0F_11E5,
        };
        index.insert_lines(1, line_count);
        index
    }

    /// Number of lines tracked.
    pub fn line_count(&self) -> usize {
        count(&self.root)
    }

    /// Total document height in pixels.
    pub fn total_height(&self) -> f64 {
        total(&self.root)
    }

    /// The default height applied to newly inserted lines.
    pub fn default_height(&self) -> f64 {
        self.default_height
    }

    /// Height of a 1-based line. Out-of-range lines report the default.
    pub fn line_height(&self, line_number: usize) -> f64 {
        if line_number == 0 || line_number > self.line_count() {
            return self.default_height;
        }
        let mut target = line_number - 1;
        let mut node = self.root.as_deref();
        while let Some(n) = node {
            let left_count = count(&n.left);
            if target < left_count {
                node = n.left.as_deref();
            } else if target == left_count {
                return n.height;
            } else {
                target -= left_count + 1;
                node = n.right.as_deref();
            }
        }
        self.default_height
    }

    /// Set the height of a 1-based line. Out-of-range lines are ignored.
    pub fn set_line_height(&mut self, line_number: usize, height: f64) {
        if line_number == 0 || line_number > self.line_count() {
            return;
        }
        set_at(&mut self.root, line_number - 1, height);
    }

    /// Insert `count` lines at default height so that the first becomes line
    /// `first_line` (1-based).
    pub fn insert_lines(&mut self, first_line: usize, how_many: usize) {
        if how_many == 0 {
            return;
        }
        let at = (first_line.saturating_sub(1)).min(self.line_count());
        let mut inserted = None;
        for _ in 0..how_many {
            let priority = splitmix(&mut self.seed);
            inserted = merge(inserted, Some(Node::leaf(self.default_height, priority)));
        }
        let (a, b) = split(self.root.take(), at);
        self.root = merge(merge(a, inserted), b);
    }

    /// Remove `how_many` lines starting at 1-based `first_line`.
    pub fn remove_lines(&mut self, first_line: usize, how_many: usize) {
        if how_many == 0 || first_line == 0 {
            return;
        }
        let at = first_line - 1;
        if at >= self.line_count() {
            return;
        }
        let how_many = how_many.min(self.line_count() - at);
        let (a, rest) = split(self.root.take(), at);
        let (_, b) = split(rest, how_many);
        self.root = merge(a, b);
    }

    /// Y pixel coordinate of the top of a 1-based line.
    ///
    /// Lines past the end report the total height.
    pub fn line_to_y(&self, line_number: usize) -> f64 {
        let target = line_number.saturating_sub(1).min(self.line_count());
        let mut remaining = target;
        let mut y = 0.0;
        let mut node = self.root.as_deref();
        while let Some(n) = node {
            let left_count = count(&n.left);
            if remaining < left_count {
                node = n.left.as_deref();
            } else if remaining == left_count {
                return y + total(&n.left);
            } else {
                y += total(&n.left) + n.height;
                remaining -= left_count + 1;
                node = n.right.as_deref();
            }
        }
        y
    }

    /// 1-based line containing the y pixel coordinate.
    ///
    /// Negative y clamps to the first line; y at or past the total height
    /// clamps to the last line. A y falling on a zero-height run (lines hidden
    /// in a collapsed fold) resolves to the next line with positive height
    /// below it, which is the next visible line.
    pub fn y_to_line(&self, y: f64) -> usize {
        let line_count = self.line_count();
        if line_count == 0 || y <= 0.0 {
            return 1;
        }
        if y >= self.total_height() {
            return line_count.max(1);
        }
        let mut remaining = y;
        let mut index = 0usize;
        let mut node = self.root.as_deref();
        while let Some(n) = node {
            let left_total = total(&n.left);
            if remaining < left_total {
                node = n.left.as_deref();
            } else if remaining < left_total + n.height {
                return index + count(&n.left) + 1;
            } else {
                remaining -= left_total + n.height;
                index += count(&n.left) + 1;
                node = n.right.as_deref();
            }
        }
        (index + 1).min(line_count)
    }
}
