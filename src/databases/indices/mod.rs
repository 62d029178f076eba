pub mod r_tree;
