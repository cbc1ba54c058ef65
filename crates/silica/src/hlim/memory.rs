use crate::hlim::node::{reg, NodeKind};
use crate::hlim::{Circuit, GroupKind, NodeId, NodePort};

/// Ports of one detected memory cluster, recorded on the SFU group for the
/// back-end.
#[derive(Debug, Clone)]
pub struct MemoryGroupPorts {
    pub memory: NodeId,
    pub read_ports: Vec<MemoryReadPort>,
    pub write_ports: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct MemoryReadPort {
    pub node: NodeId,
    /// Register fused behind the data output that turns the asynchronous
    /// read into a synchronous one. Must share the port's enable and have no
    /// reset value.
    pub sync_read_data_reg: Option<NodeId>,
    /// Optional second register behind the sync-read register, on the same
    /// clock.
    pub output_reg: Option<NodeId>,
    /// Where consumers outside the cluster pick up the read data.
    pub data_output: NodePort,
}

/// Wraps every memory and its ports into a dedicated SFU group and fuses
/// trailing read registers into the cluster.
pub fn find_memory_groups(circuit: &mut Circuit) {
    let memories: Vec<NodeId> = circuit
        .node_ids()
        .filter(|id| matches!(circuit.node(*id).kind, NodeKind::Memory { .. }))
        .collect();

    for memory in memories {
        let parent = circuit
            .node(memory)
            .group()
            .unwrap_or_else(|| circuit.root_group());
        if circuit.group(parent).kind == GroupKind::Sfu {
            continue; // already detected
        }

        let group = circuit.create_group(parent, GroupKind::Sfu, "memory");
        circuit.group_mut(group).comment = "Auto generated".to_string();
        circuit.move_to_group(memory, Some(group));

        let mut ports = MemoryGroupPorts {
            memory,
            read_ports: Vec::new(),
            write_ports: Vec::new(),
        };

        let attached: Vec<NodeId> = circuit
            .consumers(NodePort::new(memory, 0))
            .iter()
            .map(|consumer| consumer.node)
            .collect();

        for port in attached {
            match circuit.node(port).kind {
                NodeKind::MemWritePort { .. } => {
                    circuit.move_to_group(port, Some(group));
                    ports.write_ports.push(port);
                }
                NodeKind::MemReadPort { .. } => {
                    circuit.move_to_group(port, Some(group));
                    let mut read = MemoryReadPort {
                        node: port,
                        sync_read_data_reg: None,
                        output_reg: None,
                        data_output: NodePort::new(port, crate::hlim::node::read_port::DATA_OUT),
                    };

                    let port_enable =
                        circuit.non_signal_driver(port, crate::hlim::node::read_port::ENABLE);
                    if let Some((data_reg, path)) =
                        follow_to_register(circuit, read.data_output, |c, candidate| {
                            c.non_signal_driver(candidate, reg::ENABLE) == port_enable
                                && c.non_signal_driver(candidate, reg::RESET_VALUE).is_none()
                        })
                    {
                        for node in path {
                            circuit.move_to_group(node, Some(group));
                        }
                        circuit.move_to_group(data_reg, Some(group));
                        read.sync_read_data_reg = Some(data_reg);
                        read.data_output = NodePort::new(data_reg, 0);

                        let data_reg_clock = circuit.node(data_reg).clock(0);
                        if let Some((out_reg, path)) =
                            follow_to_register(circuit, read.data_output, |c, candidate| {
                                c.node(candidate).clock(0) == data_reg_clock
                            })
                        {
                            for node in path {
                                circuit.move_to_group(node, Some(group));
                            }
                            circuit.move_to_group(out_reg, Some(group));
                            read.output_reg = Some(out_reg);
                            read.data_output = NodePort::new(out_reg, 0);
                        }
                    }

                    ports.read_ports.push(read);
                }
                _ => {}
            }
        }

        circuit.group_mut(group).memory_ports = Some(ports);
    }
}

/// Walks a single-consumer signal path from `from` to a register satisfying
/// `accept`. Any fan-out along the way means the unregistered value is also
/// observed and fusion is not allowed.
fn follow_to_register(
    circuit: &Circuit,
    from: NodePort,
    accept: impl Fn(&Circuit, NodeId) -> bool,
) -> Option<(NodeId, Vec<NodeId>)> {
    let mut path = Vec::new();
    let mut current = from;
    loop {
        let consumers = circuit.consumers(current);
        if consumers.len() != 1 {
            return None;
        }
        let next = consumers[0].node;
        match circuit.node(next).kind {
            NodeKind::Register => {
                if accept(circuit, next) {
                    return Some((next, path));
                }
                return None;
            }
            NodeKind::Signal => {
                path.push(next);
                current = NodePort::new(next, 0);
            }
            _ => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockRational;
    use crate::hlim::node::read_port;
    use crate::hlim::ConnectionType;

    #[test]
    fn detects_sync_read_register() {
        let mut c = Circuit::new();
        let clk = c.create_root_clock("clk", ClockRational::new(1_000_000, 1));
        let memory = c.add_memory(8, 16);
        let wp = c.add_write_port(memory, clk);
        let rp = c.add_read_port(memory);

        let enable = c.add_named_signal(ConnectionType::bit(), "rd_en");
        c.connect(NodePort::new(enable, 0), rp, read_port::ENABLE)
            .unwrap();
        let addr = c.add_named_signal(ConnectionType::bitvec(4), "rd_addr");
        c.connect(NodePort::new(addr, 0), rp, read_port::ADDRESS)
            .unwrap();

        let data_reg = c.add_register(clk);
        c.connect(NodePort::new(rp, read_port::DATA_OUT), data_reg, reg::DATA)
            .unwrap();
        c.connect(NodePort::new(enable, 0), data_reg, reg::ENABLE)
            .unwrap();

        find_memory_groups(&mut c);

        let group = c.node(memory).group().unwrap();
        assert_eq!(c.group(group).kind, GroupKind::Sfu);
        let ports = c.group(group).memory_ports().unwrap();
        assert_eq!(ports.memory, memory);
        assert_eq!(ports.write_ports, vec![wp]);
        assert_eq!(ports.read_ports.len(), 1);
        let read = &ports.read_ports[0];
        assert_eq!(read.sync_read_data_reg, Some(data_reg));
        assert_eq!(read.output_reg, None);
        assert_eq!(read.data_output, NodePort::new(data_reg, 0));
        assert_eq!(c.node(data_reg).group(), Some(group));
    }

    #[test]
    fn register_with_other_enable_stays_outside() {
        let mut c = Circuit::new();
        let clk = c.create_root_clock("clk", ClockRational::new(1_000_000, 1));
        let memory = c.add_memory(8, 16);
        let rp = c.add_read_port(memory);

        let enable = c.add_named_signal(ConnectionType::bit(), "rd_en");
        let other = c.add_named_signal(ConnectionType::bit(), "other_en");
        c.connect(NodePort::new(enable, 0), rp, read_port::ENABLE)
            .unwrap();

        let data_reg = c.add_register(clk);
        c.connect(NodePort::new(rp, read_port::DATA_OUT), data_reg, reg::DATA)
            .unwrap();
        c.connect(NodePort::new(other, 0), data_reg, reg::ENABLE)
            .unwrap();

        find_memory_groups(&mut c);

        let group = c.node(memory).group().unwrap();
        let ports = c.group(group).memory_ports().unwrap();
        assert_eq!(ports.read_ports[0].sync_read_data_reg, None);
        assert_ne!(c.node(data_reg).group(), Some(group));
    }
}
