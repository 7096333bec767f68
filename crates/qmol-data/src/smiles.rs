//! SMILES parsing into an explicit molecular graph.
//!
//! Covers the organic subset plus bracket atoms, ring closures (including
//! `%nn`), branches, charges, and aromatic atoms/bonds. That is the full
//! vocabulary the QM9 SMILES column uses (H, C, N, O, F) with headroom for
//! the other common organic elements.
//!
//! Parsing produces heavy atoms with an implicit-hydrogen count;
//! [`Molecule::with_explicit_hydrogens`] then materializes hydrogens as
//! real atoms so the graph lines up row-for-row with the 3D coordinate
//! table, which stores hydrogens explicitly. Hydrogens are appended after
//! all heavy atoms, grouped in parent-atom order.
//!
//! A malformed SMILES string is a hard error carrying the byte offset;
//! the store build treats it as fatal.

use crate::{Error, Result};
use std::collections::HashMap;

/// Chemical elements the parser understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Element {
    H,
    B,
    C,
    N,
    O,
    F,
    P,
    S,
    Cl,
    Br,
    I,
}

impl Element {
    /// Atomic number.
    pub fn atomic_number(self) -> i64 {
        match self {
            Element::H => 1,
            Element::B => 5,
            Element::C => 6,
            Element::N => 7,
            Element::O => 8,
            Element::F => 9,
            Element::P => 15,
            Element::S => 16,
            Element::Cl => 17,
            Element::Br => 35,
            Element::I => 53,
        }
    }

    /// Default valence used to fill implicit hydrogens on organic-subset atoms.
    fn default_valence(self) -> i32 {
        match self {
            Element::H | Element::F | Element::Cl | Element::Br | Element::I => 1,
            Element::O | Element::S => 2,
            Element::B | Element::N | Element::P => 3,
            Element::C => 4,
        }
    }

    /// Index into the closed element vocabulary, used as a categorical feature.
    pub fn vocab_index(self) -> i64 {
        match self {
            Element::H => 0,
            Element::B => 1,
            Element::C => 2,
            Element::N => 3,
            Element::O => 4,
            Element::F => 5,
            Element::P => 6,
            Element::S => 7,
            Element::Cl => 8,
            Element::Br => 9,
            Element::I => 10,
        }
    }

    /// Number of entries in the element vocabulary.
    pub const VOCAB_SIZE: usize = 11;

    fn from_symbol(sym: &str) -> Option<Element> {
        Some(match sym {
            "H" => Element::H,
            "B" => Element::B,
            "C" => Element::C,
            "N" => Element::N,
            "O" => Element::O,
            "F" => Element::F,
            "P" => Element::P,
            "S" => Element::S,
            "Cl" => Element::Cl,
            "Br" => Element::Br,
            "I" => Element::I,
            _ => None?,
        })
    }
}

/// Bond order of a chemical bond.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BondOrder {
    Single,
    Double,
    Triple,
    Aromatic,
}

impl BondOrder {
    /// Fractional order used when summing valences.
    fn order_value(self) -> f32 {
        match self {
            BondOrder::Single => 1.0,
            BondOrder::Double => 2.0,
            BondOrder::Triple => 3.0,
            BondOrder::Aromatic => 1.5,
        }
    }

    /// Index into the closed bond-type vocabulary.
    pub fn type_index(self) -> i64 {
        match self {
            BondOrder::Single => 0,
            BondOrder::Double => 1,
            BondOrder::Triple => 2,
            BondOrder::Aromatic => 3,
        }
    }

    /// Number of entries in the bond-type vocabulary.
    pub const VOCAB_SIZE: usize = 4;
}

/// One atom of a parsed molecule.
#[derive(Debug, Clone)]
pub struct Atom {
    pub element: Element,
    pub aromatic: bool,
    pub charge: i32,
    /// Hydrogens attached to this atom: explicit count for bracket atoms,
    /// filled from default valences otherwise.
    pub num_h: u8,
}

/// An undirected bond between two atoms.
#[derive(Debug, Clone, Copy)]
pub struct Bond {
    pub a: usize,
    pub b: usize,
    pub order: BondOrder,
}

/// A parsed molecule: atoms plus undirected bonds.
#[derive(Debug, Clone, Default)]
pub struct Molecule {
    pub atoms: Vec<Atom>,
    pub bonds: Vec<Bond>,
}

impl Molecule {
    /// Parse a SMILES string into a heavy-atom molecule.
    pub fn parse(smiles: &str) -> Result<Molecule> {
        Parser::new(smiles).run()
    }

    /// Number of atoms.
    pub fn num_atoms(&self) -> usize {
        self.atoms.len()
    }

    /// Materialize implicit hydrogens as explicit atoms with single bonds.
    ///
    /// Hydrogens are appended after all existing atoms, in parent-atom
    /// order, matching the layout of the spatial coordinate table.
    pub fn with_explicit_hydrogens(mut self) -> Molecule {
        let heavy_count = self.atoms.len();
        for parent in 0..heavy_count {
            for _ in 0..self.atoms[parent].num_h {
                let h_idx = self.atoms.len();
                self.atoms.push(Atom {
                    element: Element::H,
                    aromatic: false,
                    charge: 0,
                    num_h: 0,
                });
                self.bonds.push(Bond {
                    a: parent,
                    b: h_idx,
                    order: BondOrder::Single,
                });
            }
        }
        self
    }

    /// Degree of each atom (bond count, undirected).
    pub fn degrees(&self) -> Vec<u32> {
        let mut deg = vec![0u32; self.atoms.len()];
        for b in &self.bonds {
            deg[b.a] += 1;
            deg[b.b] += 1;
        }
        deg
    }

    /// Ring membership via bridge detection: a bond is in a ring iff it is
    /// not a bridge of the bond graph; an atom is in a ring iff it is
    /// incident to a ring bond. Returns (per-atom, per-bond) flags.
    pub fn ring_flags(&self) -> (Vec<bool>, Vec<bool>) {
        let n = self.atoms.len();
        let mut adj: Vec<Vec<(usize, usize)>> = vec![Vec::new(); n];
        for (bi, b) in self.bonds.iter().enumerate() {
            adj[b.a].push((b.b, bi));
            adj[b.b].push((b.a, bi));
        }

        let mut disc = vec![usize::MAX; n];
        let mut low = vec![0usize; n];
        let mut is_bridge = vec![false; self.bonds.len()];
        let mut timer = 0usize;

        // Iterative DFS so pathological inputs cannot exhaust the stack.
        for root in 0..n {
            if disc[root] != usize::MAX {
                continue;
            }
            // (node, parent-bond, next adjacency cursor)
            let mut stack: Vec<(usize, usize, usize)> = vec![(root, usize::MAX, 0)];
            disc[root] = timer;
            low[root] = timer;
            timer += 1;
            while !stack.is_empty() {
                let top = stack.len() - 1;
                let (v, pbond, cursor) = stack[top];
                if cursor < adj[v].len() {
                    stack[top].2 += 1;
                    let (to, bid) = adj[v][cursor];
                    if bid == pbond {
                        continue;
                    }
                    if disc[to] == usize::MAX {
                        disc[to] = timer;
                        low[to] = timer;
                        timer += 1;
                        stack.push((to, bid, 0));
                    } else {
                        low[v] = low[v].min(disc[to]);
                    }
                } else {
                    stack.pop();
                    if let Some(&(parent, _, _)) = stack.last() {
                        low[parent] = low[parent].min(low[v]);
                        if low[v] > disc[parent] {
                            is_bridge[pbond] = true;
                        }
                    }
                }
            }
        }

        let bond_in_ring: Vec<bool> = is_bridge.iter().map(|&b| !b).collect();
        let mut atom_in_ring = vec![false; n];
        for (bi, b) in self.bonds.iter().enumerate() {
            if bond_in_ring[bi] {
                atom_in_ring[b.a] = true;
                atom_in_ring[b.b] = true;
            }
        }
        (atom_in_ring, bond_in_ring)
    }
}

struct Parser<'a> {
    smiles: &'a str,
    bytes: &'a [u8],
    pos: usize,
    mol: Molecule,
    /// Last atom a new atom bonds to; `None` after '.' or at the start.
    prev: Option<usize>,
    /// Branch return points.
    stack: Vec<Option<usize>>,
    /// Bond symbol waiting for its second atom.
    pending: Option<BondOrder>,
    /// Open ring closures: digit -> (atom, bond symbol at opening).
    rings: HashMap<u16, (usize, Option<BondOrder>)>,
}

impl<'a> Parser<'a> {
    fn new(smiles: &'a str) -> Self {
        Self {
            smiles,
            bytes: smiles.as_bytes(),
            pos: 0,
            mol: Molecule::default(),
            prev: None,
            stack: Vec::new(),
            pending: None,
            rings: HashMap::new(),
        }
    }

    fn err(&self, msg: impl Into<String>) -> Error {
        Error::SmilesParse {
            smiles: self.smiles.to_string(),
            pos: self.pos,
            msg: msg.into(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek();
        if b.is_some() {
            self.pos += 1;
        }
        b
    }

    fn run(mut self) -> Result<Molecule> {
        while let Some(c) = self.peek() {
            match c {
                b'C' | b'N' | b'O' | b'F' | b'B' | b'P' | b'S' | b'I' => {
                    let start = self.pos;
                    self.pos += 1;
                    // Two-letter organic-subset symbols.
                    let sym = match (c, self.peek()) {
                        (b'C', Some(b'l')) => {
                            self.pos += 1;
                            "Cl"
                        }
                        (b'B', Some(b'r')) => {
                            self.pos += 1;
                            "Br"
                        }
                        _ => &self.smiles[start..start + 1],
                    };
                    let element = Element::from_symbol(sym)
                        .ok_or_else(|| self.err(format!("unknown element '{sym}'")))?;
                    self.add_atom(element, false, 0, None)?;
                }
                b'c' | b'n' | b'o' | b'p' | b's' | b'b' => {
                    self.pos += 1;
                    let sym = (c.to_ascii_uppercase() as char).to_string();
                    let element = Element::from_symbol(&sym)
                        .ok_or_else(|| self.err("unknown aromatic element"))?;
                    self.add_atom(element, true, 0, None)?;
                }
                b'[' => {
                    self.pos += 1;
                    self.bracket_atom()?;
                }
                b'-' | b'/' | b'\\' => {
                    self.pos += 1;
                    self.pending = Some(BondOrder::Single);
                }
                b'=' => {
                    self.pos += 1;
                    self.pending = Some(BondOrder::Double);
                }
                b'#' => {
                    self.pos += 1;
                    self.pending = Some(BondOrder::Triple);
                }
                b':' => {
                    self.pos += 1;
                    self.pending = Some(BondOrder::Aromatic);
                }
                b'(' => {
                    self.pos += 1;
                    self.stack.push(self.prev);
                }
                b')' => {
                    self.pos += 1;
                    self.prev = self
                        .stack
                        .pop()
                        .ok_or_else(|| self.err("unmatched ')'"))?;
                }
                b'.' => {
                    self.pos += 1;
                    self.prev = None;
                }
                b'0'..=b'9' => {
                    self.pos += 1;
                    self.ring_closure(u16::from(c - b'0'))?;
                }
                b'%' => {
                    self.pos += 1;
                    let d1 = self.bump().filter(u8::is_ascii_digit);
                    let d2 = self.bump().filter(u8::is_ascii_digit);
                    match (d1, d2) {
                        (Some(a), Some(b)) => {
                            self.ring_closure(u16::from(a - b'0') * 10 + u16::from(b - b'0'))?;
                        }
                        _ => return Err(self.err("'%' needs two digits")),
                    }
                }
                _ => return Err(self.err(format!("unexpected character '{}'", c as char))),
            }
        }
        if !self.rings.is_empty() {
            return Err(self.err("unclosed ring bond"));
        }
        if !self.stack.is_empty() {
            return Err(self.err("unclosed branch"));
        }
        self.fill_implicit_hydrogens();
        Ok(self.mol)
    }

    /// Parse the body of a bracket atom; '[' is already consumed.
    fn bracket_atom(&mut self) -> Result<()> {
        // Optional isotope, ignored.
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }

        let c = self.bump().ok_or_else(|| self.err("unterminated '['"))?;
        let aromatic = c.is_ascii_lowercase();
        let start = self.pos - 1;
        if !c.is_ascii_alphabetic() {
            return Err(self.err("expected element symbol"));
        }
        // Second letter of a two-letter symbol (never aromatic).
        if !aromatic && self.peek().is_some_and(|b| b.is_ascii_lowercase()) {
            let two = &self.smiles[start..start + 2];
            if Element::from_symbol(two).is_some() {
                self.pos += 1;
            }
        }
        let sym = self.smiles[start..self.pos].to_ascii_uppercase();
        let sym = if aromatic { sym } else { self.smiles[start..self.pos].to_string() };
        let element = Element::from_symbol(&sym)
            .ok_or_else(|| self.err(format!("unknown element '{sym}'")))?;

        // Chirality markers, ignored.
        while self.peek() == Some(b'@') {
            self.pos += 1;
        }

        // Explicit hydrogen count.
        let mut num_h: u8 = 0;
        if self.peek() == Some(b'H') {
            self.pos += 1;
            num_h = 1;
            if let Some(d) = self.peek().filter(u8::is_ascii_digit) {
                self.pos += 1;
                num_h = d - b'0';
            }
        }

        // Charge: '+'/'-' optionally repeated or followed by a digit.
        let mut charge: i32 = 0;
        while let Some(sign @ (b'+' | b'-')) = self.peek() {
            self.pos += 1;
            let unit = if sign == b'+' { 1 } else { -1 };
            if let Some(d) = self.peek().filter(u8::is_ascii_digit) {
                self.pos += 1;
                charge += unit * i32::from(d - b'0');
            } else {
                charge += unit;
            }
        }

        // Atom class, ignored.
        if self.peek() == Some(b':') {
            self.pos += 1;
            while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                self.pos += 1;
            }
        }

        if self.bump() != Some(b']') {
            return Err(self.err("expected ']'"));
        }
        self.add_atom(element, aromatic, charge, Some(num_h))
    }

    fn add_atom(
        &mut self,
        element: Element,
        aromatic: bool,
        charge: i32,
        explicit_h: Option<u8>,
    ) -> Result<()> {
        let idx = self.mol.atoms.len();
        self.mol.atoms.push(Atom {
            element,
            aromatic,
            charge,
            // u8::MAX marks "fill from default valence" for organic-subset atoms.
            num_h: explicit_h.unwrap_or(u8::MAX),
        });
        if let Some(prev) = self.prev {
            let order = match self.pending.take() {
                Some(order) => order,
                None if aromatic && self.mol.atoms[prev].aromatic => BondOrder::Aromatic,
                None => BondOrder::Single,
            };
            self.mol.bonds.push(Bond {
                a: prev,
                b: idx,
                order,
            });
        } else if self.pending.take().is_some() {
            return Err(self.err("bond symbol with no preceding atom"));
        }
        self.prev = Some(idx);
        Ok(())
    }

    fn ring_closure(&mut self, label: u16) -> Result<()> {
        let here = self.prev.ok_or_else(|| self.err("ring digit before any atom"))?;
        let pending = self.pending.take();
        match self.rings.remove(&label) {
            Some((there, opened_with)) => {
                if there == here {
                    return Err(self.err("ring bond to self"));
                }
                let order = match pending.or(opened_with) {
                    Some(order) => order,
                    None if self.mol.atoms[here].aromatic && self.mol.atoms[there].aromatic => {
                        BondOrder::Aromatic
                    }
                    None => BondOrder::Single,
                };
                self.mol.bonds.push(Bond {
                    a: there,
                    b: here,
                    order,
                });
            }
            None => {
                self.rings.insert(label, (here, pending));
            }
        }
        Ok(())
    }

    /// Fill `num_h` on organic-subset atoms from default valences.
    /// Aromatic bonds count 1.5, rounded up before subtracting.
    fn fill_implicit_hydrogens(&mut self) {
        let mut order_sum = vec![0.0f32; self.mol.atoms.len()];
        for b in &self.mol.bonds {
            order_sum[b.a] += b.order.order_value();
            order_sum[b.b] += b.order.order_value();
        }
        for (i, atom) in self.mol.atoms.iter_mut().enumerate() {
            if atom.num_h == u8::MAX {
                // Only organic-subset atoms reach this path; they are neutral.
                let used = order_sum[i].ceil() as i32;
                atom.num_h = (atom.element.default_valence() - used).max(0) as u8;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_water() {
        let mol = Molecule::parse("O").unwrap().with_explicit_hydrogens();
        assert_eq!(mol.num_atoms(), 3);
        assert_eq!(mol.bonds.len(), 2);
        assert_eq!(mol.atoms[0].element, Element::O);
        assert_eq!(mol.atoms[1].element, Element::H);
    }

    #[test]
    fn test_ethanol() {
        let mol = Molecule::parse("CCO").unwrap();
        assert_eq!(mol.num_atoms(), 3);
        assert_eq!(mol.atoms[0].num_h, 3);
        assert_eq!(mol.atoms[1].num_h, 2);
        assert_eq!(mol.atoms[2].num_h, 1);
        let full = mol.with_explicit_hydrogens();
        assert_eq!(full.num_atoms(), 9);
        assert_eq!(full.bonds.len(), 8);
    }

    #[test]
    fn test_hydrogens_appended_in_parent_order() {
        let mol = Molecule::parse("CO").unwrap().with_explicit_hydrogens();
        // C(3H) then O(1H): hydrogens 2..5 belong to C, 5 to O.
        assert_eq!(mol.bonds[1].a, 0);
        assert_eq!(mol.bonds[4].a, 1);
        assert_eq!(mol.bonds[4].b, 5);
    }

    #[test]
    fn test_triple_bond() {
        let mol = Molecule::parse("C#N").unwrap();
        assert_eq!(mol.bonds[0].order, BondOrder::Triple);
        assert_eq!(mol.atoms[0].num_h, 1);
        assert_eq!(mol.atoms[1].num_h, 0);
    }

    #[test]
    fn test_benzene_ring() {
        let mol = Molecule::parse("c1ccccc1").unwrap();
        assert_eq!(mol.num_atoms(), 6);
        assert_eq!(mol.bonds.len(), 6);
        assert!(mol.bonds.iter().all(|b| b.order == BondOrder::Aromatic));
        assert!(mol.atoms.iter().all(|a| a.num_h == 1));
        let (atoms_in_ring, bonds_in_ring) = mol.ring_flags();
        assert!(atoms_in_ring.iter().all(|&f| f));
        assert!(bonds_in_ring.iter().all(|&f| f));
    }

    #[test]
    fn test_branch_and_ring_flags() {
        // Methylcyclopropane: ring of 3 plus one exocyclic carbon.
        let mol = Molecule::parse("CC1CC1").unwrap();
        assert_eq!(mol.num_atoms(), 4);
        let (atoms_in_ring, bonds_in_ring) = mol.ring_flags();
        assert!(!atoms_in_ring[0]);
        assert!(atoms_in_ring[1] && atoms_in_ring[2] && atoms_in_ring[3]);
        assert_eq!(bonds_in_ring.iter().filter(|&&f| f).count(), 3);
    }

    #[test]
    fn test_charged_bracket_atom() {
        let mol = Molecule::parse("[NH4+]").unwrap();
        assert_eq!(mol.atoms[0].charge, 1);
        assert_eq!(mol.atoms[0].num_h, 4);
        let mol = Molecule::parse("[O-]C").unwrap();
        assert_eq!(mol.atoms[0].charge, -1);
        assert_eq!(mol.atoms[0].num_h, 0);
    }

    #[test]
    fn test_neutral_nitrogen_valence() {
        let mol = Molecule::parse("N").unwrap();
        assert_eq!(mol.atoms[0].num_h, 3);
    }

    #[test]
    fn test_two_letter_elements() {
        let mol = Molecule::parse("ClCBr").unwrap();
        assert_eq!(mol.atoms[0].element, Element::Cl);
        assert_eq!(mol.atoms[2].element, Element::Br);
    }

    #[test]
    fn test_parse_errors_carry_position() {
        let err = Molecule::parse("C$").unwrap_err();
        match err {
            Error::SmilesParse { pos, .. } => assert_eq!(pos, 1),
            other => panic!("unexpected error: {other}"),
        }
        assert!(Molecule::parse("C1CC").is_err());
        assert!(Molecule::parse("C(C").is_err());
        assert!(Molecule::parse("[Q]").is_err());
    }

    #[test]
    fn test_percent_ring_closure() {
        let mol = Molecule::parse("C%12CC%12").unwrap();
        assert_eq!(mol.bonds.len(), 3);
    }
}
