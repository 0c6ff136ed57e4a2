//! 依赖图构建和拓扑排序
//!
//! 分析 Pass 之间的资源依赖关系，构建 DAG 并进行拓扑排序。
//! 排序是稳定的：没有依赖关系的 pass 保持声明顺序。

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use super::resolve::RgReadSource;

/// 依赖产生的原因
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RgHazard {
    /// reader 读取 writer 的结果
    ReadAfterWrite,
    /// 后一个 writer 覆盖前一个 writer
    WriteAfterWrite,
    /// writer 覆盖 reader 正在读的内容
    WriteAfterRead,
}

/// 依赖边：从 producer 到 consumer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RgDependencyEdge {
    /// 先执行的 Pass（声明顺序下标）
    pub producer: usize,
    /// 后执行的 Pass
    pub consumer: usize,
    /// 依赖的资源和原因
    pub resources: Vec<(usize, RgHazard)>,
}

/// 依赖图
///
/// 表示 Pass 之间的依赖关系，用于拓扑排序和执行顺序计算。
#[derive(Clone, Debug)]
pub struct RgDependencyGraph {
    pass_count: usize,
    /// 邻接表（出边）
    adjacency: Vec<Vec<usize>>,
    in_degrees: Vec<usize>,
    edges: Vec<RgDependencyEdge>,
}
// new & init
impl RgDependencyGraph {
    pub fn new(pass_count: usize) -> Self {
        Self {
            pass_count,
            adjacency: vec![Vec::new(); pass_count],
            in_degrees: vec![0; pass_count],
            edges: Vec::new(),
        }
    }

    /// 添加依赖边，同一对 pass 之间只保留一条边
    pub fn add_edge(&mut self, producer: usize, consumer: usize, resource: usize, hazard: RgHazard) {
        if producer == consumer {
            return;
        }

        if let Some(edge) = self.edges.iter_mut().find(|e| e.producer == producer && e.consumer == consumer) {
            if !edge.resources.contains(&(resource, hazard)) {
                edge.resources.push((resource, hazard));
            }
            return;
        }

        self.adjacency[producer].push(consumer);
        self.in_degrees[consumer] += 1;
        self.edges.push(RgDependencyEdge {
            producer,
            consumer,
            resources: vec![(resource, hazard)],
        });
    }

    /// 分析资源依赖，构建依赖图
    ///
    /// 规则：
    /// - 写后读（RAW）：reader 依赖它读到的那次写入
    /// - 写后写（WAW）：按声明顺序，后一个 writer 依赖前一个 writer
    /// - 读后写（WAR）：读到某次写入（或初始内容）的 reader 必须在下一个 writer 之前
    ///
    /// # 参数
    /// - `reads`: pass -> [(resource, 读到的内容)]，只包含纯读取
    /// - `writes`: pass -> [resource]
    pub fn analyze(
        pass_count: usize,
        resource_count: usize,
        reads: &[Vec<(usize, RgReadSource)>],
        writes: &[Vec<usize>],
    ) -> Self {
        let mut graph = Self::new(pass_count);

        // 每个资源的写入者，按声明顺序
        let mut writers: Vec<Vec<usize>> = vec![Vec::new(); resource_count];
        for (pass, resources) in writes.iter().enumerate() {
            for &resource in resources {
                writers[resource].push(pass);
            }
        }

        for (resource, chain) in writers.iter().enumerate() {
            for pair in chain.windows(2) {
                graph.add_edge(pair[0], pair[1], resource, RgHazard::WriteAfterWrite);
            }
        }

        for (reader, resources) in reads.iter().enumerate() {
            for &(resource, source) in resources {
                let chain = &writers[resource];
                let next_writer = match source {
                    RgReadSource::Write(writer) => {
                        graph.add_edge(writer, reader, resource, RgHazard::ReadAfterWrite);
                        chain.iter().position(|&w| w == writer).and_then(|i| chain.get(i + 1))
                    }
                    RgReadSource::Initial => chain.first(),
                };
                if let Some(&next_writer) = next_writer {
                    graph.add_edge(reader, next_writer, resource, RgHazard::WriteAfterRead);
                }
            }
        }

        graph
    }
}
// tools
impl RgDependencyGraph {
    /// 执行拓扑排序
    ///
    /// 每次都取就绪的 pass 中声明顺序最小的一个。
    ///
    /// # 返回
    /// - `Ok(order)`: 拓扑排序后的 Pass 索引列表
    /// - `Err(remaining)`: 存在循环依赖，返回没能排序的 Pass 索引
    pub fn topological_sort(&self) -> Result<Vec<usize>, Vec<usize>> {
        let mut in_degrees = self.in_degrees.clone();
        let mut ready: BinaryHeap<Reverse<usize>> =
            (0..self.pass_count).filter(|&i| in_degrees[i] == 0).map(Reverse).collect();
        let mut result = Vec::with_capacity(self.pass_count);

        while let Some(Reverse(node)) = ready.pop() {
            result.push(node);

            for &neighbor in &self.adjacency[node] {
                in_degrees[neighbor] -= 1;
                if in_degrees[neighbor] == 0 {
                    ready.push(Reverse(neighbor));
                }
            }
        }

        if result.len() != self.pass_count {
            let remaining: Vec<usize> = (0..self.pass_count).filter(|&i| in_degrees[i] > 0).collect();
            Err(remaining)
        } else {
            Ok(result)
        }
    }

    /// 直接依赖（前驱）
    pub fn get_predecessors(&self, pass_index: usize) -> Vec<usize> {
        let mut predecessors = Vec::new();
        for (i, adj) in self.adjacency.iter().enumerate() {
            if adj.contains(&pass_index) {
                predecessors.push(i);
            }
        }
        predecessors
    }

    /// 直接后继
    pub fn get_successors(&self, pass_index: usize) -> &[usize] {
        &self.adjacency[pass_index]
    }

    pub fn edges(&self) -> &[RgDependencyEdge] {
        &self.edges
    }

    #[inline]
    pub fn pass_count(&self) -> usize {
        self.pass_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_dependency() {
        // Pass 0 写入 resource 0
        // Pass 1 读取 resource 0
        let reads = vec![vec![], vec![(0, RgReadSource::Write(0))]];
        let writes = vec![vec![0], vec![]];

        let graph = RgDependencyGraph::analyze(2, 1, &reads, &writes);

        let order = graph.topological_sort().unwrap();
        assert_eq!(order, vec![0, 1]);
        assert_eq!(graph.edges()[0].resources, vec![(0, RgHazard::ReadAfterWrite)]);
    }

    #[test]
    fn test_chain_dependency() {
        // Pass 0 -> Pass 1 -> Pass 2
        let reads = vec![vec![], vec![(0, RgReadSource::Write(0))], vec![(1, RgReadSource::Write(1))]];
        let writes = vec![vec![0], vec![1], vec![]];

        let graph = RgDependencyGraph::analyze(3, 2, &reads, &writes);

        assert_eq!(graph.topological_sort().unwrap(), vec![0, 1, 2]);
        assert_eq!(graph.get_predecessors(2), vec![1]);
        assert_eq!(graph.get_successors(0), &[1]);
    }

    #[test]
    fn test_parallel_passes() {
        // Pass 0 写入 resource 0
        // Pass 1 写入 resource 1（无依赖）
        // Pass 2 读取 resource 0 和 resource 1
        let reads = vec![vec![], vec![], vec![(0, RgReadSource::Write(0)), (1, RgReadSource::Write(1))]];
        let writes = vec![vec![0], vec![1], vec![]];

        let graph = RgDependencyGraph::analyze(3, 2, &reads, &writes);

        // 无依赖的 pass 保持声明顺序
        assert_eq!(graph.topological_sort().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn final_version_read_moves_reader_after_writer() {
        // Pass 0 读取 resource 0 的最终版本，Pass 1 写入
        let reads = vec![vec![(0, RgReadSource::Write(1))], vec![]];
        let writes = vec![vec![], vec![0]];

        let graph = RgDependencyGraph::analyze(2, 1, &reads, &writes);
        assert_eq!(graph.topological_sort().unwrap(), vec![1, 0]);
    }

    #[test]
    fn reader_of_initial_contents_precedes_first_writer() {
        let reads = vec![vec![], vec![(0, RgReadSource::Initial)]];
        let writes = vec![vec![], vec![], vec![0]];

        let graph = RgDependencyGraph::analyze(3, 1, &reads, &writes);
        assert_eq!(graph.edges()[0].resources, vec![(0, RgHazard::WriteAfterRead)]);
        assert_eq!(graph.topological_sort().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn write_after_write_keeps_declaration_order() {
        let reads = vec![vec![], vec![], vec![(0, RgReadSource::Write(0))]];
        let writes = vec![vec![0], vec![0], vec![]];

        let graph = RgDependencyGraph::analyze(3, 1, &reads, &writes);
        // reader 读的是第一次写入，必须排在第二次写入之前
        assert_eq!(graph.topological_sort().unwrap(), vec![0, 2, 1]);
    }

    #[test]
    fn cycle_reports_remaining_passes() {
        // 0 读取 1 的结果，1 读取 0 的结果
        let reads = vec![vec![(1, RgReadSource::Write(1))], vec![(0, RgReadSource::Write(0))]];
        let writes = vec![vec![0], vec![1]];

        let graph = RgDependencyGraph::analyze(2, 2, &reads, &writes);
        assert_eq!(graph.topological_sort(), Err(vec![0, 1]));
    }
}
