use anyhow::{Result, ensure};
use ndarray::Array2;

/// Index of the list header in [`NetArena::nodes`].
pub(crate) const HEAD: usize = 0;

/// Clustering record. Leaves have ids `1..=n`, amalgamated nodes get fresh ids above `n`.
#[derive(Clone, Debug, Default)]
pub(crate) struct NetNode {
    pub id: usize,
    pub next: Option<usize>,
    pub prev: Option<usize>,
    /// Cluster partner.
    pub nbr: Option<usize>,
    /// Children recorded by a 3-way join: `u = (x, y)`, `v = (y, z)`.
    pub ch1: Option<usize>,
    pub ch2: Option<usize>,
    pub sx: f64,
    pub rx: f64,
}

impl NetNode {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }
}

/// Node records plus the working distance matrix, both indexed by node id.
pub(crate) struct NetArena {
    pub n_tax: usize,
    pub nodes: Vec<NetNode>,
    pub mat: Vec<Vec<f64>>,
    /// Highest id handed out so far.
    pub num_nodes: usize,
}

impl NetArena {
    /// Leaves `1..=n` linked in ascending order behind the header.
    pub fn new(dist: &Array2<f64>) -> Self {
        let n_tax = dist.nrows();
        let capacity = (3 * n_tax).saturating_sub(5).max(n_tax + 1);
        let mut mat = vec![vec![0.0_f64; capacity]; capacity];
        for i in 1..=n_tax {
            for j in 1..=n_tax {
                mat[i][j] = dist[(i - 1, j - 1)];
            }
        }

        let mut nodes = vec![NetNode::default(); capacity];
        nodes[HEAD] = NetNode::new(HEAD);
        for id in (1..=n_tax).rev() {
            nodes[id] = NetNode::new(id);
            nodes[id].next = nodes[HEAD].next;
            nodes[HEAD].next = Some(id);
        }
        let mut t = HEAD;
        while let Some(nxt) = nodes[t].next {
            nodes[nxt].prev = Some(t);
            t = nxt;
        }

        Self {
            n_tax,
            nodes,
            mat,
            num_nodes: n_tax,
        }
    }

    /// Allocate the next id.
    pub fn alloc(&mut self) -> Result<usize> {
        let id = self.num_nodes + 1;
        ensure!(id < self.nodes.len(), "node capacity {} exceeded", self.nodes.len());
        self.nodes[id] = NetNode::new(id);
        self.num_nodes = id;
        Ok(id)
    }

    #[inline]
    pub fn d(&self, a: usize, b: usize) -> f64 {
        self.mat[self.nodes[a].id][self.nodes[b].id]
    }

    pub fn is_leaf(&self, a: usize) -> bool {
        (1..=self.n_tax).contains(&self.nodes[a].id)
    }

    /// Put `new` where `old` sits in the active list.
    pub fn replace(&mut self, old: usize, new: usize) {
        let (next, prev) = (self.nodes[old].next, self.nodes[old].prev);
        self.nodes[new].next = next;
        self.nodes[new].prev = prev;
        if let Some(nx) = next {
            self.nodes[nx].prev = Some(new);
        }
        if let Some(px) = prev {
            self.nodes[px].next = Some(new);
        }
    }

    pub fn unlink(&mut self, a: usize) {
        let (next, prev) = (self.nodes[a].next, self.nodes[a].prev);
        if let Some(ny) = next {
            self.nodes[ny].prev = prev;
        }
        if let Some(py) = prev {
            self.nodes[py].next = next;
        }
    }

    /// Current active list, in list order.
    pub fn active(&self) -> Vec<usize> {
        let mut out = Vec::new();
        let mut cur = self.nodes[HEAD].next;
        while let Some(p) = cur {
            out.push(p);
            cur = self.nodes[p].next;
        }
        out
    }

    /// Recompute every amalgamated row of `mat` from its children so that any two
    /// nodes that were ever active together have a consistent reduced distance.
    ///
    /// The agglomeration pass only refreshes rows against the nodes that are active at
    /// join time, which leaves entries between freshly created partners unset.
    pub fn rebuild_reduced_distances(&mut self) {
        for c in (self.n_tax + 1)..=self.num_nodes {
            let node = &self.nodes[c];
            let (Some(ch1), Some(ch2), Some(nbr)) = (node.ch1, node.ch2, node.nbr) else {
                continue;
            };
            // u = (x, y) is created before its partner v = (y, z)
            let (outer, middle) = if c < nbr { (ch1, ch2) } else { (ch2, ch1) };
            for k in 1..c {
                let val = (2.0 / 3.0) * self.mat[outer][k] + (1.0 / 3.0) * self.mat[middle][k];
                self.mat[c][k] = val;
                self.mat[k][c] = val;
            }
            self.mat[c][c] = 0.0;
        }
    }
}
