//! The model tree: atomic leaves, coupled nodes wiring them together, and
//! the builder API used to construct both.
//!
//! This module only describes *structure* — port names, children,
//! connections. Flattening a tree into simulators and a routing table is
//! [`crate::coordinator::Coordinator::load`]'s job; building the tree here
//! mirrors the teacher's `Coupled` builder (`add_component`/`add_eic`/
//! `add_ic`/`add_eoc`), generalised from its fixed two-port DEVStone shape
//! to arbitrary named ports and connections, and panics at build time on
//! the same classes of mistake: duplicate names, and connections naming a
//! port or child that does not exist.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::dynamics::Dynamics;

/// Constructs a fresh dynamic instance for an atomic model. Stands in for
/// the `(package, library, symbol)` factory handle of the external
/// interface: this crate never resolves such a triple itself, it only
/// needs *something* that can be called repeatedly to produce instances,
/// which a boxed closure already is.
pub type DynamicsFactory = Arc<dyn Fn() -> Box<dyn Dynamics> + Send + Sync>;

/// A leaf of the model tree.
#[derive(Clone)]
pub struct AtomicSpec {
    pub name: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub factory: DynamicsFactory,
}

impl fmt::Debug for AtomicSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicSpec")
            .field("name", &self.name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish()
    }
}

impl AtomicSpec {
    pub fn new(name: impl Into<String>, factory: DynamicsFactory) -> Self {
        AtomicSpec {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            factory,
        }
    }

    pub fn with_in_port(mut self, name: impl Into<String>) -> Self {
        self.inputs.push(name.into());
        self
    }

    pub fn with_out_port(mut self, name: impl Into<String>) -> Self {
        self.outputs.push(name.into());
        self
    }
}

/// An internal node: a named child list plus its internal, input and
/// output couplings.
#[derive(Debug, Clone)]
pub struct CoupledSpec {
    pub name: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub(crate) children: Vec<ModelNode>,
    pub(crate) eic: Vec<(String, String, String)>,
    pub(crate) ic: Vec<(String, String, String, String)>,
    pub(crate) eoc: Vec<(String, String, String)>,
}

/// A node of the model tree: either an atomic leaf or a coupled
/// composition of further nodes.
#[derive(Debug, Clone)]
pub enum ModelNode {
    Atomic(AtomicSpec),
    Coupled(CoupledSpec),
}

impl ModelNode {
    pub fn name(&self) -> &str {
        match self {
            ModelNode::Atomic(a) => &a.name,
            ModelNode::Coupled(c) => &c.name,
        }
    }

    pub fn inputs(&self) -> &[String] {
        match self {
            ModelNode::Atomic(a) => &a.inputs,
            ModelNode::Coupled(c) => &c.inputs,
        }
    }

    pub fn outputs(&self) -> &[String] {
        match self {
            ModelNode::Atomic(a) => &a.outputs,
            ModelNode::Coupled(c) => &c.outputs,
        }
    }
}

impl From<AtomicSpec> for ModelNode {
    fn from(a: AtomicSpec) -> Self {
        ModelNode::Atomic(a)
    }
}

impl From<CoupledSpec> for ModelNode {
    fn from(c: CoupledSpec) -> Self {
        ModelNode::Coupled(c)
    }
}

impl CoupledSpec {
    pub fn new(name: impl Into<String>) -> Self {
        CoupledSpec {
            name: name.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            children: Vec::new(),
            eic: Vec::new(),
            ic: Vec::new(),
            eoc: Vec::new(),
        }
    }

    pub fn add_in_port(&mut self, name: impl Into<String>) -> &mut Self {
        self.inputs.push(name.into());
        self
    }

    pub fn add_out_port(&mut self, name: impl Into<String>) -> &mut Self {
        self.outputs.push(name.into());
        self
    }

    fn child(&self, name: &str) -> &ModelNode {
        self.children
            .iter()
            .find(|c| c.name() == name)
            .unwrap_or_else(|| panic!("no such child component: {name}"))
    }

    pub fn add_component(&mut self, node: impl Into<ModelNode>) -> &mut Self {
        let node = node.into();
        if self.children.iter().any(|c| c.name() == node.name()) {
            panic!("duplicate component name: {}", node.name());
        }
        self.children.push(node);
        self
    }

    /// External input coupling: this coupled model's own `self_port`
    /// feeds `child_name`'s `child_port`.
    pub fn add_eic(
        &mut self,
        self_port: impl Into<String>,
        child_name: impl Into<String>,
        child_port: impl Into<String>,
    ) -> &mut Self {
        let self_port = self_port.into();
        let child_name = child_name.into();
        let child_port = child_port.into();
        if !self.inputs.contains(&self_port) {
            panic!("no such input port: {self_port}");
        }
        if !self.child(&child_name).inputs().contains(&child_port) {
            panic!("component {child_name} has no input port {child_port}");
        }
        self.eic.push((self_port, child_name, child_port));
        self
    }

    /// Internal coupling: `src_child`'s `src_port` output feeds
    /// `dst_child`'s `dst_port` input.
    pub fn add_ic(
        &mut self,
        src_child: impl Into<String>,
        src_port: impl Into<String>,
        dst_child: impl Into<String>,
        dst_port: impl Into<String>,
    ) -> &mut Self {
        let src_child = src_child.into();
        let src_port = src_port.into();
        let dst_child = dst_child.into();
        let dst_port = dst_port.into();
        if !self.child(&src_child).outputs().contains(&src_port) {
            panic!("component {src_child} has no output port {src_port}");
        }
        if !self.child(&dst_child).inputs().contains(&dst_port) {
            panic!("component {dst_child} has no input port {dst_port}");
        }
        self.ic.push((src_child, src_port, dst_child, dst_port));
        self
    }

    /// External output coupling: `child_name`'s `child_port` output feeds
    /// this coupled model's own `self_port` output.
    pub fn add_eoc(
        &mut self,
        child_name: impl Into<String>,
        child_port: impl Into<String>,
        self_port: impl Into<String>,
    ) -> &mut Self {
        let child_name = child_name.into();
        let child_port = child_port.into();
        let self_port = self_port.into();
        if !self.child(&child_name).outputs().contains(&child_port) {
            panic!("component {child_name} has no output port {child_port}");
        }
        if !self.outputs.contains(&self_port) {
            panic!("no such output port: {self_port}");
        }
        self.eoc.push((child_name, child_port, self_port));
        self
    }

    pub fn n_eics(&self) -> usize {
        self.eic.len()
    }
    pub fn n_ics(&self) -> usize {
        self.ic.len()
    }
    pub fn n_eocs(&self) -> usize {
        self.eoc.len()
    }
}

/// A fully resolved hierarchy: every atomic leaf plus every connection
/// reduced to an atomic-to-atomic `(name, port, name, port)` edge, with
/// all intermediate coupled wiring folded away.
#[derive(Debug)]
pub struct Flattened {
    pub atomics: Vec<AtomicSpec>,
    pub connections: Vec<(String, String, String, String)>,
}

type PortMap = HashMap<String, Vec<(String, String)>>;

/// Walks `node`, recording every atomic leaf and every connection
/// resolved down to atomic endpoints, and returns the input-entry and
/// output-exit maps `node` itself exposes to whatever coupled parent
/// eventually references it by name.
fn resolve(
    node: &ModelNode,
    atomics: &mut Vec<AtomicSpec>,
    connections: &mut Vec<(String, String, String, String)>,
) -> (PortMap, PortMap) {
    match node {
        ModelNode::Atomic(a) => {
            let inputs = a
                .inputs
                .iter()
                .map(|p| (p.clone(), vec![(a.name.clone(), p.clone())]))
                .collect();
            let outputs = a
                .outputs
                .iter()
                .map(|p| (p.clone(), vec![(a.name.clone(), p.clone())]))
                .collect();
            atomics.push(a.clone());
            (inputs, outputs)
        }
        ModelNode::Coupled(c) => {
            let mut child_inputs: HashMap<String, PortMap> = HashMap::new();
            let mut child_outputs: HashMap<String, PortMap> = HashMap::new();
            for child in &c.children {
                let (ci, co) = resolve(child, atomics, connections);
                child_inputs.insert(child.name().to_string(), ci);
                child_outputs.insert(child.name().to_string(), co);
            }
            for (src_child, src_port, dst_child, dst_port) in &c.ic {
                let srcs = &child_outputs[src_child][src_port];
                let dsts = &child_inputs[dst_child][dst_port];
                for (sn, sp) in srcs {
                    for (dn, dp) in dsts {
                        connections.push((sn.clone(), sp.clone(), dn.clone(), dp.clone()));
                    }
                }
            }
            let mut inputs: PortMap = HashMap::new();
            for (self_port, child_name, child_port) in &c.eic {
                let entry = child_inputs[child_name][child_port].clone();
                inputs.entry(self_port.clone()).or_default().extend(entry);
            }
            let mut outputs: PortMap = HashMap::new();
            for (child_name, child_port, self_port) in &c.eoc {
                let exit = child_outputs[child_name][child_port].clone();
                outputs.entry(self_port.clone()).or_default().extend(exit);
            }
            (inputs, outputs)
        }
    }
}

/// Flattens a model tree into its atomic leaves and their fully resolved
/// connections. The root node's own input/output ports have no parent to
/// connect them to and are discarded.
pub fn flatten(root: &ModelNode) -> Flattened {
    let mut atomics = Vec::new();
    let mut connections = Vec::new();
    resolve(root, &mut atomics, &mut connections);
    Flattened {
        atomics,
        connections,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamics::{Dynamics, ExternalEvent, OutputEvent};
    use crate::time::Time;
    use crate::value::Value;

    struct Noop;
    impl Dynamics for Noop {
        fn init(&mut self, _t: Time) -> f64 {
            f64::INFINITY
        }
        fn time_advance(&self) -> f64 {
            f64::INFINITY
        }
        fn output(&self, _t: Time) -> Vec<OutputEvent> {
            vec![]
        }
        fn internal_transition(&mut self, _t: Time) {}
        fn external_transition(&mut self, _t: Time, _e: &[ExternalEvent]) {}
        fn observation(&self, _t: Time, _port: &str) -> Option<Value> {
            None
        }
    }

    fn noop_factory() -> DynamicsFactory {
        Arc::new(|| Box::new(Noop))
    }

    fn atomic(name: &str) -> AtomicSpec {
        AtomicSpec::new(name, noop_factory())
            .with_in_port("input")
            .with_out_port("output")
    }

    #[test]
    fn builds_a_two_level_hierarchy() {
        let mut top = CoupledSpec::new("top");
        top.add_in_port("in").add_out_port("out");
        top.add_component(atomic("a"));
        top.add_component(atomic("b"));
        top.add_eic("in", "a", "input");
        top.add_ic("a", "output", "b", "input");
        top.add_eoc("b", "output", "out");
        assert_eq!(top.n_eics(), 1);
        assert_eq!(top.n_ics(), 1);
        assert_eq!(top.n_eocs(), 1);
    }

    #[test]
    #[should_panic(expected = "duplicate component name")]
    fn rejects_duplicate_component_names() {
        let mut top = CoupledSpec::new("top");
        top.add_component(atomic("a"));
        top.add_component(atomic("a"));
    }

    #[test]
    #[should_panic(expected = "no such input port")]
    fn rejects_eic_from_unknown_self_port() {
        let mut top = CoupledSpec::new("top");
        top.add_component(atomic("a"));
        top.add_eic("missing", "a", "input");
    }

    #[test]
    #[should_panic(expected = "no such output port")]
    fn rejects_eoc_to_unknown_self_port() {
        let mut top = CoupledSpec::new("top");
        top.add_component(atomic("a"));
        top.add_eoc("a", "output", "missing");
    }

    #[test]
    #[should_panic(expected = "has no input port")]
    fn rejects_ic_to_unknown_child_port() {
        let mut top = CoupledSpec::new("top");
        top.add_component(atomic("a"));
        top.add_component(atomic("b"));
        top.add_ic("a", "output", "b", "missing");
    }

    #[test]
    #[should_panic(expected = "no such child component")]
    fn rejects_connection_to_unknown_child() {
        let mut top = CoupledSpec::new("top");
        top.add_component(atomic("a"));
        top.add_eic("in", "ghost", "input");
    }
}
