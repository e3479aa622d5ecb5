pub mod resource_layer;
