pub mod neighbour_net;
