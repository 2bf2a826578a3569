//! Log-guard cleanup (§4.7): deletes the guard instruction for every log
//! guard no rewrite claimed as load-bearing.

use crate::graph::SpeshGraph;

pub fn run(graph: &mut SpeshGraph) {
    let unused: Vec<_> = graph
        .log_guards
        .iter()
        .filter(|(_, rec)| !rec.used)
        .map(|(_, rec)| rec.ins)
        .collect();
    for ins in unused {
        let reads: Vec<_> = graph.inst(ins).read_regs().collect();
        for r in reads {
            let fact = graph.facts.get_mut(r);
            fact.usages = fact.usages.saturating_sub(1);
        }
        graph.delete_ins(ins);
    }
}
