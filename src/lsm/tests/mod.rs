mod tests_levels;
